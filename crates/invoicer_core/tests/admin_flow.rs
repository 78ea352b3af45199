//! End-to-end admin panel flows over the in-memory backend

use std::sync::Arc;

use chrono::NaiveDate;
use invoicer_core::dashboard::{Dashboard, DateRange, UNKNOWN_CUSTOMER};
use invoicer_core::provider::auth::INVALID_CREDENTIALS;
use invoicer_core::query::{ListRequest, SortSpec};
use invoicer_core::record::{CUSTOMERS, INVOICES};
use invoicer_core::{AdapterError, InvoicerConfig, Invoice, InvoiceStatus, MemoryBackend, Providers};
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn providers() -> Providers {
    let backend = MemoryBackend::new()
        .unwrap()
        .with_user("admin@example.com", "secret123", "admin")
        .unwrap()
        .with_user("clerk@example.com", "secret456", "user")
        .unwrap();
    Providers::new(Arc::new(backend), &InvoicerConfig::default())
}

async fn seed(providers: &Providers) -> (String, Vec<String>) {
    let customer = providers
        .data
        .create(
            CUSTOMERS,
            &payload(json!({ "name": "Acme", "email": "ap@acme.test", "company": "Acme Inc" })),
        )
        .await
        .unwrap();

    let rows = [
        ("INV-001", "2025-01-10", "paid", 1200.0),
        ("INV-002", "2025-02-03", "sent", 300.0),
        ("INV-003", "2025-02-20", "overdue", 80.5),
        ("INV-004", "2025-03-01", "draft", 45.0),
        ("INV-005", "2025-03-02", "paid", 99.5),
    ];
    let mut ids = Vec::new();
    for (number, date, status, amount) in rows {
        let invoice = providers
            .data
            .create(
                INVOICES,
                &payload(json!({
                    "invoice_number": number,
                    "customer": customer.id(),
                    "invoice_date": date,
                    "due_date": "2025-04-01",
                    "status": status,
                    "amount": amount
                })),
            )
            .await
            .unwrap();
        ids.push(invoice.id().to_string());
    }
    (customer.id().to_string(), ids)
}

#[tokio::test]
async fn admin_manages_invoices_end_to_end() {
    let providers = providers();
    assert!(!providers.auth.check().await.authenticated);
    assert!(
        providers
            .auth
            .login("admin@example.com", "secret123")
            .await
            .success
    );

    let (customer_id, invoice_ids) = seed(&providers).await;

    let fetched = providers.data.get_one(INVOICES, &invoice_ids[0]).await.unwrap();
    let invoice = Invoice::try_from(&fetched).unwrap();
    assert_eq!(invoice.invoice_number, "INV-001");
    assert_eq!(invoice.customer, customer_id);
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.amount, 1200.0);

    let updated = providers
        .data
        .update(INVOICES, &invoice_ids[1], &payload(json!({ "status": "paid" })))
        .await
        .unwrap();
    assert_eq!(updated.get_str("status"), Some("paid"));
    assert_eq!(updated.get_str("invoice_number"), Some("INV-002"));

    let deleted = providers.data.delete_one(INVOICES, &invoice_ids[4]).await.unwrap();
    assert_eq!(deleted, invoice_ids[4]);
    assert!(matches!(
        providers.data.get_one(INVOICES, &invoice_ids[4]).await,
        Err(AdapterError::NotFound { .. })
    ));
}

#[tokio::test]
async fn total_is_independent_of_the_page() {
    let providers = providers();
    providers.auth.login("admin@example.com", "secret123").await;
    seed(&providers).await;

    let request = |page| {
        ListRequest::new(INVOICES)
            .page(page, 2)
            .sort(SortSpec::desc("amount"))
            .filter("amount", "gte", 50)
    };
    let mut totals = Vec::new();
    let mut amounts = Vec::new();
    for page in 1..=3 {
        let result = providers.data.list(&request(page)).await.unwrap();
        assert!(result.data.len() <= 2);
        totals.push(result.total);
        amounts.extend(
            result
                .data
                .iter()
                .map(|r| r.get("amount").and_then(Value::as_f64).unwrap()),
        );
    }
    assert_eq!(totals, vec![4, 4, 4]);
    assert_eq!(amounts, vec![1200.0, 300.0, 99.5, 80.5]);
}

#[tokio::test]
async fn invalid_payloads_are_validation_errors() {
    let providers = providers();
    providers.auth.login("admin@example.com", "secret123").await;
    let (customer_id, _) = seed(&providers).await;

    let err = providers
        .data
        .create(CUSTOMERS, &payload(json!({ "name": "Bad", "email": "not-an-email" })))
        .await
        .unwrap_err();
    match err {
        AdapterError::Validation { fields, .. } => assert_eq!(fields[0].code, "validation_is_email"),
        other => panic!("unexpected {other:?}"),
    }

    let err = providers
        .data
        .create(
            INVOICES,
            &payload(json!({
                "invoice_number": "INV-NEG",
                "customer": customer_id,
                "invoice_date": "2025-01-01",
                "due_date": "2025-01-31",
                "status": "draft",
                "amount": -10
            })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));

    let err = providers
        .data
        .create(INVOICES, &payload(json!({ "amount": 10 })))
        .await
        .unwrap_err();
    match err {
        AdapterError::Validation { fields, .. } => {
            let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
            for required in ["invoice_number", "customer", "invoice_date", "due_date", "status"] {
                assert!(names.contains(&required), "{required} not reported");
            }
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn non_admins_cannot_delete_invoices() {
    let providers = providers();
    providers.auth.login("admin@example.com", "secret123").await;
    let (_, invoice_ids) = seed(&providers).await;
    providers.auth.logout().await;

    providers.auth.login("clerk@example.com", "secret456").await;
    let identity = providers.auth.get_identity().await.unwrap();
    assert_eq!(identity.get_str("role"), Some("user"));

    let err = providers
        .data
        .delete_one(INVOICES, &invoice_ids[0])
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Forbidden { .. }));
    // a permission problem on a valid session does not end the session
    assert!(!providers.auth.on_error(&err).await.logout);
    assert!(providers.data.get_one(INVOICES, &invoice_ids[0]).await.is_ok());
}

#[tokio::test]
async fn lost_session_triggers_logout() {
    let providers = providers();
    let response = providers.auth.login("admin@example.com", "wrong").await;
    assert_eq!(
        response.error.map(|e| e.to_string()).as_deref(),
        Some(INVALID_CREDENTIALS)
    );

    let err = providers
        .data
        .list(&ListRequest::new(CUSTOMERS))
        .await
        .unwrap_err();
    let signal = providers.auth.on_error(&err).await;
    assert!(signal.logout);
    assert_eq!(signal.redirect_to.as_deref(), Some("/login"));
}

#[tokio::test]
async fn dashboard_aggregates_the_selected_range() {
    let providers = providers();
    providers.auth.login("admin@example.com", "secret123").await;
    seed(&providers).await;

    let today = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
    let dashboard = Dashboard::load(&providers.data, DateRange::LastMonth, today, 1000)
        .await
        .unwrap();
    assert_eq!(dashboard.stats.total_customers, 1);
    assert_eq!(dashboard.stats.total_invoices, 2);
    assert_eq!(dashboard.stats.total_revenue, 0.0);
    assert_eq!(dashboard.stats.pending_amount, 380.5);
    assert_eq!(dashboard.recent_invoices.len(), 2);
    assert_eq!(dashboard.recent_invoices[0].customer_name, "Acme");

    let all = Dashboard::load(&providers.data, DateRange::All, today, 1000)
        .await
        .unwrap();
    assert_eq!(all.stats.total_invoices, 5);
    assert_eq!(all.stats.total_revenue, 1299.5);
    assert_eq!(all.stats.payment_rate, 40.0);
    let labels: Vec<_> = all.revenue_by_month.iter().map(|m| m.label.as_str()).collect();
    assert_eq!(labels, vec!["Jan 2025", "Mar 2025"]);
    assert_ne!(all.recent_invoices[0].customer_name, UNKNOWN_CUSTOMER);
}
