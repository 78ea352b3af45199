//! Live change feed for one collection

use invoicer_core::provider::{ActionFilter, ChangeEvent, LiveParams};
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;

use super::Session;
use crate::output::Output;

pub fn action_filter(actions: &[String]) -> Result<ActionFilter> {
    if actions.is_empty() {
        return Ok(ActionFilter::All);
    }
    Ok(ActionFilter::from_tags(actions.iter().map(String::as_str))?)
}

fn print_event(event: ChangeEvent) {
    let action = match event.action.as_str() {
        "create" => "create".bright_green().to_string(),
        "update" => "update".bright_blue().to_string(),
        other => other.bright_red().to_string(),
    };
    println!(
        "  {} {} {} {}",
        chrono::Local::now().format("%H:%M:%S").to_string().dimmed(),
        action,
        event.resource.bright_cyan(),
        event.record.id().bright_yellow()
    );
}

/// Print matching changes until ctrl-c
pub async fn watch(session: &Session, resource: &str, actions: &[String], ids: &[String]) -> Result<()> {
    let output = Output::new();
    let filter = action_filter(actions)?;
    let params = if ids.is_empty() {
        LiveParams::default()
    } else {
        LiveParams::ids(ids.iter().cloned())
    };

    let live = &session.providers.live;
    let subscription = live
        .subscribe(&format!("resources/{resource}"), filter, params, print_event)
        .await?;
    output.info("Watching", &format!("{} (ctrl-c to stop)", subscription.resource()));

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    live.unsubscribe(&subscription).await?;
    output.status("Stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoicer_core::provider::ChangeAction;

    #[test]
    fn no_actions_means_all() {
        assert_eq!(action_filter(&[]).unwrap(), ActionFilter::All);
        let only = action_filter(&["delete".to_string()]).unwrap();
        assert!(only.accepts(ChangeAction::Delete));
        assert!(!only.accepts(ChangeAction::Create));
        assert!(action_filter(&["archive".to_string()]).is_err());
    }
}
