//! Sign-in helpers and identity display

use invoicer_core::provider::Permissions;
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use std::io::{self, Write};

use super::Session;
use crate::output::Output;

/// Password from `INVOICER_PASSWORD`, or prompted without echo
pub fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("INVOICER_PASSWORD") {
        return Ok(password);
    }
    print!("Password: ");
    io::stdout().flush().into_diagnostic()?;
    rpassword::read_password().into_diagnostic()
}

/// Show the signed-in identity
pub async fn whoami(session: &Session) -> Result<()> {
    let output = Output::new();
    let auth = &session.providers.auth;

    if !auth.check().await.authenticated {
        output.warning("Not signed in");
        output.status("Pass --email to sign in");
        return Ok(());
    }

    output.section("Signed in");
    if let Some(identity) = auth.get_identity().await {
        output.record(&identity);
    }
    let permissions = match auth.get_permissions().await {
        Permissions::NotSupported => "not reported by backend".dimmed().to_string(),
        other => format!("{other:?}"),
    };
    output.kv("Permissions", &permissions);
    Ok(())
}
