use comfy_table::Cell;
use invoicer_core::migration::{MigrationRunner, current_schema};
use invoicer_core::schema::{FieldKind, RuleKind};
use miette::Result;
use owo_colors::OwoColorize;

use crate::output::{Output, new_table};

fn describe(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Text => "text".to_string(),
        FieldKind::Email => "email".to_string(),
        FieldKind::Number { min, max, .. } => match (min, max) {
            (Some(min), Some(max)) => format!("number {min}..{max}"),
            (Some(min), None) => format!("number >= {min}"),
            (None, Some(max)) => format!("number <= {max}"),
            (None, None) => "number".to_string(),
        },
        FieldKind::Date => "date".to_string(),
        FieldKind::Select { values } => format!("select {}", values.join("|")),
        FieldKind::Relation { collection } => format!("relation -> {collection}"),
        FieldKind::Editor => "editor".to_string(),
    }
}

/// Show the migrations and the collections they produce
pub fn show() -> Result<()> {
    let output = Output::new();
    let schema = current_schema()?;

    output.section("Migrations");
    for migration in MigrationRunner::historical().migrations() {
        output.success(&migration.id);
    }

    for collection in &schema.collections {
        output.section(&format!("{} ({})", collection.name, collection.id));
        let mut table = new_table();
        table.set_header(vec!["Field", "Type", "Required"]);
        for field in collection.data_fields() {
            table.add_row(vec![
                Cell::new(&field.name),
                Cell::new(describe(&field.kind)),
                Cell::new(if field.required { "yes" } else { "" }),
            ]);
        }
        println!("{table}");
        for (label, kind) in [
            ("list", RuleKind::List),
            ("view", RuleKind::View),
            ("create", RuleKind::Create),
            ("update", RuleKind::Update),
            ("delete", RuleKind::Delete),
        ] {
            let rule = match collection.rules.get(kind) {
                Some("") => "public".to_string(),
                Some(rule) => rule.to_string(),
                None => "superusers only".dimmed().to_string(),
            };
            output.kv(label, &rule);
        }
    }
    Ok(())
}
