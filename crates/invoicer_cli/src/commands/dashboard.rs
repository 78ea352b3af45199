use comfy_table::{Cell, CellAlignment};
use invoicer_core::{
    dashboard::{Dashboard, DateRange},
    utils::format_amount,
};
use miette::{Result, miette};
use owo_colors::OwoColorize;

use super::Session;
use crate::output::{Output, format_status, new_table};

/// Width of the longest revenue bar
const BAR_WIDTH: f64 = 30.0;

/// Show statistics, monthly revenue and the latest invoices
pub async fn show(session: &Session, range: &str, page_size: u32) -> Result<()> {
    let output = Output::new();
    let range: DateRange = range.parse().map_err(|e: String| miette!(e))?;
    let today = chrono::Local::now().date_naive();
    let dashboard = Dashboard::load(&session.providers.data, range, today, page_size).await?;
    let stats = &dashboard.stats;

    output.section(&format!("Dashboard ({})", dashboard.range));
    output.kv("Customers", &stats.total_customers.to_string());
    output.kv("Invoices", &stats.total_invoices.to_string());
    output.kv(
        "Revenue",
        &format_amount(stats.total_revenue).bright_green().to_string(),
    );
    output.kv(
        "Pending",
        &format_amount(stats.pending_amount).yellow().to_string(),
    );
    output.kv("Outstanding invoices", &stats.outstanding.to_string());
    output.kv("Average invoice", &format_amount(stats.average_invoice));
    output.kv("Payment rate", &format!("{:.1}%", stats.payment_rate));
    output.kv(
        "By status",
        &format!(
            "{} draft, {} sent, {} paid, {} overdue",
            stats.status_counts.draft,
            stats.status_counts.sent,
            stats.status_counts.paid,
            stats.status_counts.overdue
        ),
    );
    if dashboard.skipped_invoices > 0 {
        output.warning(&format!(
            "{} unreadable invoice records left out of these numbers",
            dashboard.skipped_invoices
        ));
    }

    output.section("Revenue by month");
    if dashboard.revenue_by_month.is_empty() {
        output.status("No paid invoices yet");
    }
    let peak = dashboard
        .revenue_by_month
        .iter()
        .map(|m| m.revenue)
        .fold(0.0_f64, f64::max);
    for month in &dashboard.revenue_by_month {
        let width = if peak > 0.0 {
            (month.revenue / peak * BAR_WIDTH).round() as usize
        } else {
            0
        };
        println!(
            "  {:<9} {} {}",
            month.label,
            "█".repeat(width).bright_cyan(),
            format_amount(month.revenue).dimmed()
        );
    }

    output.section("Recent invoices");
    if dashboard.recent_invoices.is_empty() {
        output.status("No invoices in this range");
        return Ok(());
    }
    let mut table = new_table();
    table.set_header(vec!["Number", "Customer", "Date", "Status", "Amount"]);
    for recent in &dashboard.recent_invoices {
        let invoice = &recent.invoice;
        table.add_row(vec![
            Cell::new(&invoice.invoice_number),
            Cell::new(&recent.customer_name),
            Cell::new(invoice.invoice_date.format("%Y-%m-%d")),
            Cell::new(format_status(invoice.status)),
            Cell::new(format_amount(invoice.amount)).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");
    Ok(())
}
