//! Record CRUD commands

use invoicer_core::{FilterPredicate, ListRequest, SortSpec};
use miette::{Result, miette};
use owo_colors::OwoColorize;
use serde_json::Value;

use super::{Session, parse_payload};
use crate::output::Output;

/// Parse `field:operator:value`; the value is read as JSON when it parses, text otherwise
pub fn parse_filter(raw: &str) -> Result<FilterPredicate> {
    let mut parts = raw.splitn(3, ':');
    let (Some(field), Some(operator), Some(value)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(miette!("filter '{}' is not field:operator:value", raw));
    };
    if field.is_empty() || operator.is_empty() {
        return Err(miette!("filter '{}' is not field:operator:value", raw));
    }
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::from(value));
    Ok(FilterPredicate::new(field, operator, value))
}

pub fn build_request(
    resource: &str,
    page: u32,
    per_page: u32,
    sort: &[String],
    filter: &[String],
) -> Result<ListRequest> {
    let mut request = ListRequest::new(resource).page(page, per_page);
    for token in sort {
        let spec: SortSpec = token.parse().map_err(|e: String| miette!(e))?;
        request = request.sort(spec);
    }
    for raw in filter {
        request.filters.push(parse_filter(raw)?);
    }
    Ok(request)
}

/// List one page of records
pub async fn list(
    session: &Session,
    resource: &str,
    page: u32,
    per_page: u32,
    sort: &[String],
    filter: &[String],
) -> Result<()> {
    let output = Output::new();
    let request = build_request(resource, page, per_page, sort, filter)?;
    let pagination = request.effective_pagination();
    let result = session.providers.data.list(&request).await?;

    output.section(&format!("{} (page {})", resource, pagination.current));
    if result.data.is_empty() {
        output.status("No records on this page");
    } else {
        output.records(&result.data);
    }
    output.kv(
        "Total",
        &result.total.to_string().bright_white().to_string(),
    );
    Ok(())
}

pub async fn get(session: &Session, resource: &str, id: &str) -> Result<()> {
    let output = Output::new();
    let record = session.providers.data.get_one(resource, id).await?;
    output.section(resource);
    output.record(&record);
    Ok(())
}

pub async fn create(session: &Session, resource: &str, json: &str) -> Result<()> {
    let output = Output::new();
    let payload = parse_payload(json)?;
    let record = session.providers.data.create(resource, &payload).await?;
    output.success(&format!("Created {} {}", resource, record.id().bright_yellow()));
    output.record(&record);
    Ok(())
}

pub async fn update(session: &Session, resource: &str, id: &str, json: &str) -> Result<()> {
    let output = Output::new();
    let payload = parse_payload(json)?;
    let record = session.providers.data.update(resource, id, &payload).await?;
    output.success(&format!("Updated {} {}", resource, record.id().bright_yellow()));
    output.record(&record);
    Ok(())
}

pub async fn delete(session: &Session, resource: &str, id: &str) -> Result<()> {
    let output = Output::new();
    let deleted = session.providers.data.delete_one(resource, id).await?;
    output.success(&format!("Deleted {} {}", resource, deleted.bright_yellow()));
    Ok(())
}
