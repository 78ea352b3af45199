//! Declarative collection schemas and their access rules
//!
//! The schema is data. It is owned by the backend and evolved by
//! [`crate::migration`]; the in-memory backend uses it to validate payloads
//! and to gate access the way the hosted service does.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

use crate::error::FieldError;
use crate::query::{BACKEND_DATETIME_FORMAT, parse_datetime};
use crate::record::{CUSTOMERS, INVOICES, InvoiceStatus};

pub const USERS: &str = "users";

pub const CUSTOMERS_ID: &str = "pbc_108570809";
pub const INVOICES_ID: &str = "pbc_711030668";
pub const USERS_ID: &str = "_pb_users_auth_";

/// Rule used by every collection for "any signed-in user"
pub const SIGNED_IN_RULE: &str = "@request.auth.id != \"\"";
pub const ADMIN_RULE: &str = "@request.auth.role = \"admin\"";

#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown collection: {0}")]
    #[diagnostic(code(invoicer::schema::unknown_collection))]
    UnknownCollection(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Email,
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default, rename = "onlyInt")]
        only_int: bool,
    },
    Date,
    Select {
        values: Vec<String>,
    },
    Relation {
        collection: String,
    },
    Editor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSchema {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn default_value(&self) -> Value {
        match self.kind {
            FieldKind::Number { .. } => Value::from(0),
            _ => Value::String(String::new()),
        }
    }

    /// Cast an incoming value into the stored representation
    fn coerce(&self, value: Value) -> Value {
        match (&self.kind, value) {
            (_, Value::Null) => self.default_value(),
            (FieldKind::Number { .. }, Value::String(s)) if s.trim().is_empty() => Value::from(0),
            (FieldKind::Number { .. }, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(n) => number_value(n),
                Err(_) => Value::String(s),
            },
            (FieldKind::Date, Value::String(s)) => match parse_datetime(&s) {
                Some(dt) => Value::String(dt.format(BACKEND_DATETIME_FORMAT).to_string()),
                None => Value::String(s),
            },
            (_, value) => value,
        }
    }

    fn validate(&self, value: &Value) -> Option<FieldError> {
        let error = |code: &str, message: String| Some(FieldError::new(&self.name, code, message));

        if is_blank(value) {
            return if self.required {
                error("validation_required", "Cannot be blank.".to_string())
            } else {
                None
            };
        }

        match &self.kind {
            FieldKind::Text | FieldKind::Editor | FieldKind::Relation { .. } => match value {
                Value::String(_) => None,
                _ => error("validation_invalid_value", "Must be a string.".to_string()),
            },
            FieldKind::Email => match value.as_str() {
                Some(s) if is_email(s) => None,
                _ => error("validation_is_email", "Must be a valid email address.".to_string()),
            },
            FieldKind::Number { min, max, only_int } => {
                let Some(n) = value.as_f64() else {
                    return error("validation_invalid_number", "Must be a valid number.".to_string());
                };
                if *only_int && n.fract() != 0.0 {
                    return error(
                        "validation_only_int_constraint",
                        "Decimal numbers are not allowed.".to_string(),
                    );
                }
                if let Some(min) = min.filter(|min| n < *min) {
                    return error(
                        "validation_min_number_constraint",
                        format!("Must be larger than {min}."),
                    );
                }
                if let Some(max) = max.filter(|max| n > *max) {
                    return error(
                        "validation_max_number_constraint",
                        format!("Must be less than {max}."),
                    );
                }
                None
            }
            FieldKind::Date => match value.as_str().and_then(parse_datetime) {
                Some(_) => None,
                None => error("validation_invalid_date", "Must be a valid date.".to_string()),
            },
            FieldKind::Select { values } => match value.as_str() {
                Some(s) if values.iter().any(|v| v == s) => None,
                _ => error("validation_invalid_value", format!("Invalid value {value}.")),
            },
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    #[serde(rename = "listRule")]
    List,
    #[serde(rename = "viewRule")]
    View,
    #[serde(rename = "createRule")]
    Create,
    #[serde(rename = "updateRule")]
    Update,
    #[serde(rename = "deleteRule")]
    Delete,
}

/// Per-action access rules: `None` locks the action to superusers,
/// an empty rule is public
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRules {
    pub list_rule: Option<String>,
    pub view_rule: Option<String>,
    pub create_rule: Option<String>,
    pub update_rule: Option<String>,
    pub delete_rule: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Allowed,
    Denied,
    SuperusersOnly,
}

impl AccessRules {
    pub fn all(rule: &str) -> Self {
        Self {
            list_rule: Some(rule.to_string()),
            view_rule: Some(rule.to_string()),
            create_rule: Some(rule.to_string()),
            update_rule: Some(rule.to_string()),
            delete_rule: Some(rule.to_string()),
        }
    }

    pub fn get(&self, kind: RuleKind) -> Option<&str> {
        match kind {
            RuleKind::List => self.list_rule.as_deref(),
            RuleKind::View => self.view_rule.as_deref(),
            RuleKind::Create => self.create_rule.as_deref(),
            RuleKind::Update => self.update_rule.as_deref(),
            RuleKind::Delete => self.delete_rule.as_deref(),
        }
    }

    pub fn set(&mut self, kind: RuleKind, value: Option<String>) {
        let slot = match kind {
            RuleKind::List => &mut self.list_rule,
            RuleKind::View => &mut self.view_rule,
            RuleKind::Create => &mut self.create_rule,
            RuleKind::Update => &mut self.update_rule,
            RuleKind::Delete => &mut self.delete_rule,
        };
        *slot = value;
    }

    /// Evaluate a rule against the requesting identity (`None` when anonymous)
    pub fn evaluate(&self, kind: RuleKind, auth: Option<&Map<String, Value>>) -> RuleOutcome {
        let Some(rule) = self.get(kind) else {
            return RuleOutcome::SuperusersOnly;
        };
        match evaluate_rule(rule, auth) {
            Some(true) => RuleOutcome::Allowed,
            Some(false) => RuleOutcome::Denied,
            None => {
                warn!("unsupported access rule '{}', denying", rule);
                RuleOutcome::Denied
            }
        }
    }
}

/// `None` when the rule uses syntax outside `@request.auth.<field> <op> "<value>"`
/// clauses joined by `&&`
fn evaluate_rule(rule: &str, auth: Option<&Map<String, Value>>) -> Option<bool> {
    if rule.trim().is_empty() {
        return Some(true);
    }
    let mut allowed = true;
    for clause in rule.split("&&") {
        let clause = clause.trim();
        let (lhs, op, rhs) = ["!=", "="]
            .iter()
            .find_map(|op| clause.split_once(op).map(|(l, r)| (l.trim(), *op, r.trim())))?;
        let field = lhs.strip_prefix("@request.auth.")?;
        let expected = rhs
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .or_else(|| rhs.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))?;
        let actual = auth
            .and_then(|record| record.get(field))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let holds = match op {
            "=" => actual == expected,
            _ => actual != expected,
        };
        allowed &= holds;
    }
    Some(allowed)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub auth: bool,
    pub fields: Vec<FieldSchema>,
    #[serde(flatten)]
    pub rules: AccessRules,
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether a filter or sort may reference this name
    pub fn has_field(&self, name: &str) -> bool {
        matches!(name, "id" | "created" | "updated") || self.field(name).is_some()
    }

    /// Schema fields other than the system `id`
    pub fn data_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.name != "id")
    }

    /// Keep schema fields only, cast values and fill defaults
    pub fn normalize(&self, payload: &Map<String, Value>) -> Map<String, Value> {
        self.data_fields()
            .map(|field| {
                let value = payload
                    .get(&field.name)
                    .cloned()
                    .map(|v| field.coerce(v))
                    .unwrap_or_else(|| field.default_value());
                (field.name.clone(), value)
            })
            .collect()
    }

    pub fn validate(&self, record: &Map<String, Value>) -> Result<(), Vec<FieldError>> {
        let errors: Vec<FieldError> = self
            .data_fields()
            .filter_map(|field| field.validate(record.get(&field.name).unwrap_or(&Value::Null)))
            .collect();
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Relation fields pointing at `collection`
    pub fn relations_to<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a FieldSchema> {
        self.data_fields().filter(move |f| {
            matches!(&f.kind, FieldKind::Relation { collection: target } if target == collection)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSet {
    pub collections: Vec<CollectionSchema>,
}

impl SchemaSet {
    /// Look up by name or id
    pub fn get(&self, name_or_id: &str) -> Option<&CollectionSchema> {
        self.collections
            .iter()
            .find(|c| c.name == name_or_id || c.id == name_or_id)
    }

    pub fn get_mut(&mut self, name_or_id: &str) -> Result<&mut CollectionSchema, SchemaError> {
        self.collections
            .iter_mut()
            .find(|c| c.name == name_or_id || c.id == name_or_id)
            .ok_or_else(|| SchemaError::UnknownCollection(name_or_id.to_string()))
    }

    /// Collections as they stood before any recorded migration
    pub fn baseline() -> Self {
        let text = |id: &str, name: &str| FieldSchema::new(id, name, FieldKind::Text);

        let customers = CollectionSchema {
            id: CUSTOMERS_ID.to_string(),
            name: CUSTOMERS.to_string(),
            auth: false,
            fields: vec![
                text("text3208210256", "id").required(),
                text("text1579384326", "name").required(),
                text("text1146066909", "phone"),
                text("text1337919823", "company"),
                FieldSchema::new("editor223244161", "address", FieldKind::Editor),
            ],
            rules: AccessRules::all(SIGNED_IN_RULE),
        };

        let invoices = CollectionSchema {
            id: INVOICES_ID.to_string(),
            name: INVOICES.to_string(),
            auth: false,
            fields: vec![
                text("text3208210256", "id").required(),
                FieldSchema::new(
                    "relation2168032777",
                    "customer",
                    FieldKind::Relation {
                        collection: CUSTOMERS_ID.to_string(),
                    },
                )
                .required(),
                FieldSchema::new("date2862495610", "invoice_date", FieldKind::Date).required(),
                FieldSchema::new("date1940587374", "due_date", FieldKind::Date).required(),
                FieldSchema::new(
                    "select2063623452",
                    "status",
                    FieldKind::Select {
                        values: InvoiceStatus::ALL
                            .iter()
                            .map(|s| s.as_str().to_string())
                            .collect(),
                    },
                )
                .required(),
                FieldSchema::new("editor18589324", "notes", FieldKind::Editor),
            ],
            rules: AccessRules::all(SIGNED_IN_RULE),
        };

        let users = CollectionSchema {
            id: USERS_ID.to_string(),
            name: USERS.to_string(),
            auth: true,
            fields: vec![
                text("text3208210256", "id").required(),
                FieldSchema::new("email3885137012", "email", FieldKind::Email).required(),
                text("text1579384326", "name"),
                FieldSchema::new(
                    "select1466534506",
                    "role",
                    FieldKind::Select {
                        values: vec!["admin".to_string(), "user".to_string()],
                    },
                ),
            ],
            rules: AccessRules::all(SIGNED_IN_RULE),
        };

        Self {
            collections: vec![customers, invoices, users],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn amount_field() -> FieldSchema {
        FieldSchema::new(
            "number2392944706",
            "amount",
            FieldKind::Number {
                min: Some(0.0),
                max: None,
                only_int: false,
            },
        )
        .required()
    }

    #[test]
    fn rejects_negative_amounts() {
        let err = amount_field().validate(&json!(-5)).unwrap();
        assert_eq!(err.code, "validation_min_number_constraint");
        assert!(amount_field().validate(&json!(12.5)).is_none());
    }

    #[test]
    fn required_number_treats_zero_as_blank() {
        let err = amount_field().validate(&json!(0)).unwrap();
        assert_eq!(err.code, "validation_required");

        let mut optional = amount_field();
        optional.required = false;
        assert!(optional.validate(&json!(0)).is_none());
    }

    #[test]
    fn required_fields_cannot_be_blank() {
        let schema = SchemaSet::baseline();
        let customers = schema.get(CUSTOMERS).unwrap();
        let record = customers.normalize(&object(json!({ "phone": "555-0100" })));
        let errors = customers.validate(&record).unwrap_err();
        let names: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(names.contains(&"name"));
    }

    #[test]
    fn normalize_casts_and_drops_unknown_fields() {
        let schema = SchemaSet::baseline();
        let invoices = schema.get(INVOICES).unwrap();
        let record = invoices.normalize(&object(json!({
            "invoice_date": "2025-02-01",
            "bogus": true
        })));
        assert_eq!(record["invoice_date"], json!("2025-02-01 00:00:00.000Z"));
        assert_eq!(record["notes"], json!(""));
        assert!(record.get("bogus").is_none());
    }

    #[test]
    fn email_format() {
        assert!(is_email("billing@acme.test"));
        assert!(!is_email("billing@acme"));
        assert!(!is_email("not an email@acme.test"));
        assert!(!is_email("@acme.test"));
    }

    #[test]
    fn evaluates_auth_rules() {
        let rules = AccessRules {
            delete_rule: Some(ADMIN_RULE.to_string()),
            ..AccessRules::all(SIGNED_IN_RULE)
        };
        let admin = object(json!({ "id": "u1", "role": "admin" }));
        let staff = object(json!({ "id": "u2", "role": "user" }));

        assert_eq!(rules.evaluate(RuleKind::Delete, Some(&admin)), RuleOutcome::Allowed);
        assert_eq!(rules.evaluate(RuleKind::Delete, Some(&staff)), RuleOutcome::Denied);
        assert_eq!(rules.evaluate(RuleKind::List, Some(&staff)), RuleOutcome::Allowed);
        assert_eq!(rules.evaluate(RuleKind::List, None), RuleOutcome::Denied);

        let locked = AccessRules::default();
        assert_eq!(locked.evaluate(RuleKind::View, Some(&admin)), RuleOutcome::SuperusersOnly);
        let public = AccessRules::all("");
        assert_eq!(public.evaluate(RuleKind::View, None), RuleOutcome::Allowed);
    }

    #[test]
    #[tracing_test::traced_test]
    fn unsupported_rules_deny() {
        let rules = AccessRules::all("@collection.teams.owner ?= @request.auth.id");
        let admin = object(json!({ "id": "u1" }));
        assert_eq!(rules.evaluate(RuleKind::View, Some(&admin)), RuleOutcome::Denied);
        assert!(logs_contain("unsupported access rule"));
    }
}
