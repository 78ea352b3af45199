//! Paired forward/backward schema migrations
//!
//! Every change is idempotent: re-adding a field id replaces it in place and
//! removing a missing field is a no-op, so a migration can be re-run safely.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::schema::{
    ADMIN_RULE, CUSTOMERS_ID, FieldKind, FieldSchema, INVOICES_ID, RuleKind, SIGNED_IN_RULE,
    SchemaError, SchemaSet,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    AddField {
        collection: String,
        index: usize,
        field: FieldSchema,
    },
    RemoveField {
        collection: String,
        field_id: String,
    },
    SetRule {
        collection: String,
        rule: RuleKind,
        value: Option<String>,
    },
}

impl SchemaSet {
    pub fn apply(&mut self, change: &SchemaChange) -> Result<(), SchemaError> {
        match change {
            SchemaChange::AddField {
                collection,
                index,
                field,
            } => {
                let schema = self.get_mut(collection)?;
                match schema.fields.iter().position(|f| f.id == field.id) {
                    Some(existing) => schema.fields[existing] = field.clone(),
                    None => {
                        let at = (*index).min(schema.fields.len());
                        schema.fields.insert(at, field.clone());
                    }
                }
            }
            SchemaChange::RemoveField {
                collection,
                field_id,
            } => {
                self.get_mut(collection)?.fields.retain(|f| &f.id != field_id);
            }
            SchemaChange::SetRule {
                collection,
                rule,
                value,
            } => {
                self.get_mut(collection)?.rules.set(*rule, value.clone());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Timestamp-prefixed name, also the ordering key
    pub id: String,
    pub up: Vec<SchemaChange>,
    pub down: Vec<SchemaChange>,
}

impl Migration {
    pub fn apply_up(&self, schema: &mut SchemaSet) -> Result<(), SchemaError> {
        debug!("migrating up: {}", self.id);
        self.up.iter().try_for_each(|change| schema.apply(change))
    }

    pub fn apply_down(&self, schema: &mut SchemaSet) -> Result<(), SchemaError> {
        debug!("migrating down: {}", self.id);
        self.down.iter().try_for_each(|change| schema.apply(change))
    }
}

#[derive(Debug, Clone)]
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        Self { migrations }
    }

    /// The migrations recorded for the customers/invoices collections
    pub fn historical() -> Self {
        Self::new(historical_migrations())
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every migration in order
    pub fn up(&self, schema: &mut SchemaSet) -> Result<(), SchemaError> {
        for migration in &self.migrations {
            migration.apply_up(schema)?;
        }
        info!("applied {} migrations", self.migrations.len());
        Ok(())
    }

    /// Revert every migration, newest first
    pub fn down(&self, schema: &mut SchemaSet) -> Result<(), SchemaError> {
        for migration in self.migrations.iter().rev() {
            migration.apply_down(schema)?;
        }
        info!("reverted {} migrations", self.migrations.len());
        Ok(())
    }
}

/// Baseline plus every historical migration
pub fn current_schema() -> Result<SchemaSet, SchemaError> {
    let mut schema = SchemaSet::baseline();
    MigrationRunner::historical().up(&mut schema)?;
    Ok(schema)
}

fn add_then_remove(id: &str, collection: &str, index: usize, field: FieldSchema) -> Migration {
    Migration {
        id: id.to_string(),
        down: vec![SchemaChange::RemoveField {
            collection: collection.to_string(),
            field_id: field.id.clone(),
        }],
        up: vec![SchemaChange::AddField {
            collection: collection.to_string(),
            index,
            field,
        }],
    }
}

fn historical_migrations() -> Vec<Migration> {
    vec![
        add_then_remove(
            "1760827703_updated_customers",
            CUSTOMERS_ID,
            2,
            FieldSchema::new("email3885137012", "email", FieldKind::Email).required(),
        ),
        add_then_remove(
            "1760827961_updated_invoices",
            INVOICES_ID,
            1,
            FieldSchema::new("text765886983", "invoice_number", FieldKind::Text).required(),
        ),
        add_then_remove(
            "1760828253_updated_invoices",
            INVOICES_ID,
            6,
            FieldSchema::new(
                "number2392944706",
                "amount",
                FieldKind::Number {
                    min: Some(0.0),
                    max: None,
                    only_int: false,
                },
            )
            .required(),
        ),
        Migration {
            id: "1760911812_updated_invoices".to_string(),
            up: vec![SchemaChange::SetRule {
                collection: INVOICES_ID.to_string(),
                rule: RuleKind::Delete,
                value: Some(ADMIN_RULE.to_string()),
            }],
            down: vec![SchemaChange::SetRule {
                collection: INVOICES_ID.to_string(),
                rule: RuleKind::Delete,
                value: Some(SIGNED_IN_RULE.to_string()),
            }],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CUSTOMERS, INVOICES};
    use pretty_assertions::assert_eq;

    fn field_names(schema: &SchemaSet, collection: &str) -> Vec<String> {
        schema
            .get(collection)
            .unwrap()
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    #[test]
    fn current_schema_has_every_field_in_position() {
        let schema = current_schema().unwrap();
        assert_eq!(
            field_names(&schema, CUSTOMERS),
            vec!["id", "name", "email", "phone", "company", "address"]
        );
        assert_eq!(
            field_names(&schema, INVOICES),
            vec![
                "id",
                "invoice_number",
                "customer",
                "invoice_date",
                "due_date",
                "status",
                "amount",
                "notes"
            ]
        );
        assert_eq!(
            schema.get(INVOICES).unwrap().rules.delete_rule.as_deref(),
            Some(ADMIN_RULE)
        );
    }

    #[test]
    fn each_migration_reverts_exactly() {
        let runner = MigrationRunner::historical();
        let mut schema = SchemaSet::baseline();
        for migration in runner.migrations() {
            let before = schema.clone();
            migration.apply_up(&mut schema).unwrap();
            assert_ne!(schema, before, "{} changed nothing", migration.id);
            let after = schema.clone();
            migration.apply_down(&mut schema).unwrap();
            assert_eq!(schema, before, "{} did not revert", migration.id);
            migration.apply_up(&mut schema).unwrap();
            assert_eq!(schema, after);
        }
    }

    #[test]
    fn rerunning_is_idempotent() {
        let runner = MigrationRunner::historical();
        let mut schema = SchemaSet::baseline();
        runner.up(&mut schema).unwrap();
        let once = schema.clone();
        runner.up(&mut schema).unwrap();
        assert_eq!(schema, once);

        runner.down(&mut schema).unwrap();
        runner.down(&mut schema).unwrap();
        assert_eq!(schema, SchemaSet::baseline());
    }

    #[test]
    fn unknown_collection_is_an_error() {
        let mut schema = SchemaSet::baseline();
        let change = SchemaChange::RemoveField {
            collection: "pbc_missing".to_string(),
            field_id: "x".to_string(),
        };
        assert_eq!(
            schema.apply(&change),
            Err(SchemaError::UnknownCollection("pbc_missing".to_string()))
        );
    }
}
