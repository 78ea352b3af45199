//! Aggregate statistics for the dashboard
//!
//! [`DashboardStats::compute`] and [`revenue_by_month`] are pure; only
//! [`Dashboard::load`] talks to the backend.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};
use crate::provider::DataProvider;
use crate::query::ListRequest;
use crate::record::{CUSTOMERS, INVOICES, Invoice, InvoiceStatus, Record};

pub const RECENT_INVOICES: usize = 5;
pub const REVENUE_MONTHS: usize = 6;
pub const UNKNOWN_CUSTOMER: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateRange {
    #[default]
    All,
    ThisMonth,
    LastMonth,
    ThisYear,
}

impl DateRange {
    pub fn contains(self, date: NaiveDate, today: NaiveDate) -> bool {
        match self {
            DateRange::All => true,
            DateRange::ThisMonth => same_month(date, today.year(), today.month()),
            DateRange::LastMonth => {
                let (year, month) = if today.month() == 1 {
                    (today.year() - 1, 12)
                } else {
                    (today.year(), today.month() - 1)
                };
                same_month(date, year, month)
            }
            DateRange::ThisYear => date.year() == today.year(),
        }
    }
}

fn same_month(date: NaiveDate, year: i32, month: u32) -> bool {
    date.year() == year && date.month() == month
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(DateRange::All),
            "this-month" | "thisMonth" => Ok(DateRange::ThisMonth),
            "last-month" | "lastMonth" => Ok(DateRange::LastMonth),
            "this-year" | "thisYear" => Ok(DateRange::ThisYear),
            other => Err(format!("unknown date range '{other}'")),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DateRange::All => "All Time",
            DateRange::ThisMonth => "This Month",
            DateRange::LastMonth => "Last Month",
            DateRange::ThisYear => "This Year",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub draft: usize,
    pub sent: usize,
    pub paid: usize,
    pub overdue: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_customers: u64,
    pub total_invoices: usize,
    /// Sum of paid invoices
    pub total_revenue: f64,
    /// Sum of everything not yet paid
    pub pending_amount: f64,
    pub status_counts: StatusCounts,
    /// Invoices not yet paid
    pub outstanding: usize,
    pub average_invoice: f64,
    /// Paid share of all invoices, in percent
    pub payment_rate: f64,
}

impl DashboardStats {
    /// `invoices` is the already range-filtered set
    pub fn compute(total_customers: u64, invoices: &[Invoice]) -> Self {
        let mut stats = DashboardStats {
            total_customers,
            total_invoices: invoices.len(),
            ..Default::default()
        };

        for invoice in invoices {
            match invoice.status {
                InvoiceStatus::Paid => {
                    stats.total_revenue += invoice.amount;
                    stats.status_counts.paid += 1;
                }
                other => {
                    stats.pending_amount += invoice.amount;
                    stats.outstanding += 1;
                    match other {
                        InvoiceStatus::Draft => stats.status_counts.draft += 1,
                        InvoiceStatus::Sent => stats.status_counts.sent += 1,
                        InvoiceStatus::Overdue => stats.status_counts.overdue += 1,
                        InvoiceStatus::Paid => {}
                    }
                }
            }
        }

        if stats.total_invoices > 0 {
            let count = stats.total_invoices as f64;
            stats.average_invoice = (stats.total_revenue + stats.pending_amount) / count;
            stats.payment_rate = stats.status_counts.paid as f64 / count * 100.0;
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRevenue {
    /// `Mon YYYY`
    pub label: String,
    pub revenue: f64,
}

/// Paid revenue grouped by invoice month, the latest months in chronological order
pub fn revenue_by_month(invoices: &[Invoice]) -> Vec<MonthlyRevenue> {
    let mut months: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for invoice in invoices.iter().filter(|i| i.status == InvoiceStatus::Paid) {
        let key = (invoice.invoice_date.year(), invoice.invoice_date.month());
        *months.entry(key).or_default() += invoice.amount;
    }

    let skip = months.len().saturating_sub(REVENUE_MONTHS);
    months
        .into_iter()
        .skip(skip)
        .filter_map(|((year, month), revenue)| {
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            Some(MonthlyRevenue {
                label: first.format("%b %Y").to_string(),
                revenue,
            })
        })
        .collect()
}

pub fn filter_invoices(invoices: &[Invoice], range: DateRange, today: NaiveDate) -> Vec<Invoice> {
    invoices
        .iter()
        .filter(|invoice| range.contains(invoice.invoice_date, today))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentInvoice {
    pub invoice: Invoice,
    pub customer_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub range: DateRange,
    pub stats: DashboardStats,
    pub revenue_by_month: Vec<MonthlyRevenue>,
    pub recent_invoices: Vec<RecentInvoice>,
    /// Invoice records that could not be read and are left out of the stats
    pub skipped_invoices: usize,
}

impl Dashboard {
    /// Fetch both collections in one page each and aggregate them
    pub async fn load(
        provider: &DataProvider,
        range: DateRange,
        today: NaiveDate,
        page_size: u32,
    ) -> Result<Self> {
        let customers = provider
            .list(&ListRequest::new(CUSTOMERS).page(1, page_size))
            .await?;
        let invoice_page = provider
            .list(&ListRequest::new(INVOICES).page(1, page_size))
            .await?;
        if invoice_page.total > invoice_page.data.len() as u64 {
            warn!(
                "dashboard sees {} of {} invoices; raise dashboard_page_size",
                invoice_page.data.len(),
                invoice_page.total
            );
        }

        let (invoices, skipped_invoices) = read_invoices(&invoice_page.data);

        let filtered = filter_invoices(&invoices, range, today);
        debug!(range = ?range, invoices = filtered.len(), "dashboard");
        let stats = DashboardStats::compute(customers.total, &filtered);
        let recent: Vec<Invoice> = filtered.into_iter().take(RECENT_INVOICES).collect();
        let names = customer_names(provider, &recent).await?;

        Ok(Self {
            range,
            stats,
            revenue_by_month: revenue_by_month(&invoices),
            skipped_invoices,
            recent_invoices: recent
                .into_iter()
                .map(|invoice| RecentInvoice {
                    customer_name: names
                        .get(&invoice.customer)
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_CUSTOMER.to_string()),
                    invoice,
                })
                .collect(),
        })
    }
}

/// Typed invoices plus the number of records that failed to convert
fn read_invoices(records: &[Record]) -> (Vec<Invoice>, usize) {
    let mut skipped = 0;
    let invoices = records
        .iter()
        .filter_map(|record| match Invoice::try_from(record) {
            Ok(invoice) => Some(invoice),
            Err(e) => {
                warn!("skipping invoice {}: {}", record.id(), e);
                skipped += 1;
                None
            }
        })
        .collect();
    (invoices, skipped)
}

async fn customer_names(
    provider: &DataProvider,
    invoices: &[Invoice],
) -> Result<HashMap<String, String>> {
    let mut ids: Vec<String> = invoices.iter().map(|i| i.customer.clone()).collect();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let records = match provider.get_many(CUSTOMERS, &ids).await {
        Ok(records) => records,
        Err(AdapterError::NotFound { .. }) => {
            // some referenced customers are gone; resolve the rest one by one
            let mut found = Vec::new();
            for id in &ids {
                if let Ok(record) = provider.get_one(CUSTOMERS, id).await {
                    found.push(record);
                }
            }
            found
        }
        Err(e) => return Err(e),
    };

    Ok(records
        .into_iter()
        .filter_map(|record| {
            let name = record.get_str("name").filter(|n| !n.is_empty())?.to_string();
            Some((record.id().to_string(), name))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn invoice(number: &str, day: NaiveDate, status: InvoiceStatus, amount: f64) -> Invoice {
        Invoice {
            id: number.to_lowercase(),
            invoice_number: number.to_string(),
            customer: "c1".to_string(),
            invoice_date: day,
            due_date: day,
            status,
            amount,
            notes: None,
        }
    }

    #[test]
    #[tracing_test::traced_test]
    fn unreadable_invoices_are_counted() {
        let records: Vec<Record> = [
            json!({
                "id": "inv000000000001",
                "invoice_number": "INV-1",
                "customer": "c1",
                "invoice_date": "2025-01-02 00:00:00.000Z",
                "due_date": "2025-02-01 00:00:00.000Z",
                "status": "paid",
                "amount": 100
            }),
            json!({ "id": "inv000000000002", "invoice_number": "INV-2", "status": "lost" }),
        ]
        .into_iter()
        .map(|value| Record::from_value(value).unwrap())
        .collect();

        let (invoices, skipped) = read_invoices(&records);
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].invoice_number, "INV-1");
        assert_eq!(skipped, 1);
        assert!(logs_contain("skipping invoice inv000000000002"));
    }

    #[test]
    fn last_month_wraps_the_year() {
        let today = date(2025, 1, 15);
        assert!(DateRange::LastMonth.contains(date(2024, 12, 31), today));
        assert!(!DateRange::LastMonth.contains(date(2025, 1, 1), today));
        assert!(DateRange::ThisMonth.contains(date(2025, 1, 1), today));
        assert!(DateRange::ThisYear.contains(date(2025, 11, 1), today));
        assert!(!DateRange::ThisYear.contains(date(2024, 11, 1), today));
    }

    #[test]
    fn stats_over_mixed_statuses() {
        let invoices = vec![
            invoice("INV-1", date(2025, 1, 2), InvoiceStatus::Paid, 100.0),
            invoice("INV-2", date(2025, 1, 3), InvoiceStatus::Sent, 50.0),
            invoice("INV-3", date(2025, 1, 4), InvoiceStatus::Overdue, 25.0),
            invoice("INV-4", date(2025, 1, 5), InvoiceStatus::Draft, 25.0),
        ];
        let stats = DashboardStats::compute(3, &invoices);
        assert_eq!(stats.total_customers, 3);
        assert_eq!(stats.total_invoices, 4);
        assert_eq!(stats.total_revenue, 100.0);
        assert_eq!(stats.pending_amount, 100.0);
        assert_eq!(stats.outstanding, 3);
        assert_eq!(
            stats.status_counts,
            StatusCounts {
                draft: 1,
                sent: 1,
                paid: 1,
                overdue: 1
            }
        );
        assert_eq!(stats.average_invoice, 50.0);
        assert_eq!(stats.payment_rate, 25.0);
    }

    #[test]
    fn empty_stats_do_not_divide_by_zero() {
        let stats = DashboardStats::compute(0, &[]);
        assert_eq!(stats.average_invoice, 0.0);
        assert_eq!(stats.payment_rate, 0.0);
    }

    #[test]
    fn revenue_keeps_the_latest_six_months_in_order() {
        let mut invoices: Vec<Invoice> = (1..=8)
            .rev()
            .map(|m| invoice(&format!("INV-{m}"), date(2024, m, 10), InvoiceStatus::Paid, m as f64))
            .collect();
        invoices.push(invoice("INV-X", date(2024, 8, 20), InvoiceStatus::Paid, 2.0));
        invoices.push(invoice("INV-Y", date(2024, 8, 21), InvoiceStatus::Sent, 500.0));

        let chart = revenue_by_month(&invoices);
        let labels: Vec<_> = chart.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Mar 2024", "Apr 2024", "May 2024", "Jun 2024", "Jul 2024", "Aug 2024"]
        );
        assert_eq!(chart.last().unwrap().revenue, 10.0);
    }

    #[test]
    fn parses_range_names() {
        assert_eq!("this-month".parse::<DateRange>().unwrap(), DateRange::ThisMonth);
        assert_eq!("lastMonth".parse::<DateRange>().unwrap(), DateRange::LastMonth);
        assert!("yesterday".parse::<DateRange>().is_err());
    }
}
