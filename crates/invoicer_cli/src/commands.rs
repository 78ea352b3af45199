pub mod auth;
pub mod config;
pub mod dashboard;
pub mod records;
pub mod schema;
pub mod watch;

use std::sync::Arc;

use invoicer_core::{
    Backend, InvoicerConfig, MemoryBackend, PocketBaseClient, Providers,
    record::{CUSTOMERS, INVOICES},
};
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::output::Output;

/// Demo credentials for `--memory` runs
pub const DEMO_EMAIL: &str = "admin@example.com";
pub const DEMO_PASSWORD: &str = "admin12345";

/// Providers for one CLI invocation
pub struct Session {
    pub providers: Providers,
}

impl Session {
    /// Pass a command failure through the auth error hook before reporting it
    pub async fn finish(&self, outcome: Result<()>) -> Result<()> {
        let Err(report) = outcome else {
            return Ok(());
        };
        if let Some(err) = report.downcast_ref::<invoicer_core::AdapterError>() {
            let signal = self.providers.auth.on_error(err).await;
            if signal.logout {
                self.providers.auth.logout().await;
                Output::new().warning(&format!(
                    "Session is no longer valid; sign in again with {}",
                    "--email".bright_cyan()
                ));
            }
        }
        Err(report)
    }
}

/// Build the backend and providers, signing in when an email is given
pub async fn connect(config: &InvoicerConfig, memory: bool, email: Option<&str>) -> Result<Session> {
    let backend: Arc<dyn Backend> = if memory {
        Arc::new(demo_backend()?)
    } else {
        Arc::new(PocketBaseClient::from_config(&config.backend)?)
    };
    debug!("using backend at {}", backend.base_url());
    let providers = Providers::new(backend, config);

    let email = match (email, memory) {
        (Some(email), _) => Some(email),
        (None, true) => Some(DEMO_EMAIL),
        (None, false) => None,
    };
    if let Some(email) = email {
        let password = if memory && email == DEMO_EMAIL {
            DEMO_PASSWORD.to_string()
        } else {
            auth::read_password()?
        };
        providers.auth.login(email, &password).await.into_result()?;
        debug!("signed in as {}", email);
    }

    Ok(Session { providers })
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// In-process backend with a demo admin, customers and a spread of invoices
fn demo_backend() -> Result<MemoryBackend> {
    let backend = MemoryBackend::new()?
        .with_user(DEMO_EMAIL, DEMO_PASSWORD, "admin")?
        .with_user("clerk@example.com", "clerk12345", "user")?;

    let customers = [
        ("Acme Corporation", "billing@acme.test", Some("Acme Corp")),
        ("Globex", "accounts@globex.test", Some("Globex Inc")),
        ("Jane Freelancer", "jane@example.com", None),
    ];
    let mut ids = Vec::new();
    for (name, email, company) in customers {
        let row = backend.seed(
            CUSTOMERS,
            object(json!({ "name": name, "email": email, "company": company.unwrap_or_default() })),
        )?;
        ids.push(row.get("id").and_then(Value::as_str).unwrap_or_default().to_string());
    }

    let today = chrono::Local::now().date_naive();
    let statuses = ["paid", "sent", "paid", "overdue", "draft", "paid", "sent", "paid"];
    for (i, status) in statuses.iter().enumerate() {
        let invoice_date = today - chrono::Days::new(i as u64 * 23);
        let due_date = invoice_date + chrono::Days::new(30);
        backend.seed(
            INVOICES,
            object(json!({
                "invoice_number": format!("INV-{:04}", i + 1),
                "customer": ids[i % ids.len()],
                "invoice_date": invoice_date.format("%Y-%m-%d").to_string(),
                "due_date": due_date.format("%Y-%m-%d").to_string(),
                "status": status,
                "amount": 150.0 * (i as f64 + 1.0),
            })),
        )?;
    }
    debug!("seeded {} customers and {} invoices", ids.len(), statuses.len());
    Ok(backend)
}

/// Parse a JSON object given on the command line
pub fn parse_payload(json: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(json).into_diagnostic()? {
        Value::Object(map) => Ok(map),
        other => Err(miette::miette!("expected a JSON object, got {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_must_be_an_object() {
        assert!(parse_payload(r#"{"name":"Acme"}"#).is_ok());
        assert!(parse_payload("[1,2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn demo_backend_seeds_collections() {
        let backend = demo_backend().unwrap();
        let schema = backend.schema();
        assert!(schema.get(CUSTOMERS).is_some());
        assert!(schema.get(INVOICES).is_some());
    }
}
