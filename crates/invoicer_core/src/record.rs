//! Generic record shape and the two typed collections built on it

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AdapterError, Result};
use crate::query::parse_datetime;

pub const CUSTOMERS: &str = "customers";
pub const INVOICES: &str = "invoices";

/// Backend-maintained fields that callers never supply
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "created",
    "updated",
    "collectionId",
    "collectionName",
    "expand",
];

/// A mapping from field name to value that always carries a non-empty id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from an untrusted backend payload
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(AdapterError::malformed("record is not an object", value));
        };
        let id = match fields.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            other => {
                if let Some(other) = other {
                    fields.insert("id".to_string(), other);
                }
                return Err(AdapterError::malformed(
                    "record has no string id",
                    Value::Object(fields),
                ));
            }
        };
        Ok(Self { id, fields })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == "id" {
            return None;
        }
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert("id".to_string(), Value::String(self.id.clone()));
        map.extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = AdapterError;

    fn try_from(value: Value) -> Result<Self> {
        Record::from_value(value)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        let mut map = record.fields;
        map.insert("id".to_string(), Value::String(record.id));
        Value::Object(map)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub company: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub address: Option<String>,
}

impl TryFrom<&Record> for Customer {
    type Error = AdapterError;

    fn try_from(record: &Record) -> Result<Self> {
        serde_json::from_value(record.to_value())
            .map_err(|e| AdapterError::malformed(format!("not a customer: {e}"), record.to_value()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 4] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    /// Id of the referenced customer
    pub customer: String,
    #[serde(with = "backend_date")]
    pub invoice_date: NaiveDate,
    #[serde(with = "backend_date")]
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    #[serde(deserialize_with = "number_or_string")]
    pub amount: f64,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub notes: Option<String>,
}

impl Invoice {
    /// Payload suitable for create/update, without the id
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.remove("id");
        map
    }
}

impl TryFrom<&Record> for Invoice {
    type Error = AdapterError;

    fn try_from(record: &Record) -> Result<Self> {
        serde_json::from_value(record.to_value())
            .map_err(|e| AdapterError::malformed(format!("not an invoice: {e}"), record.to_value()))
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom("amount out of range")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid amount '{s}'"))),
        other => Err(D::Error::custom(format!("invalid amount {other}"))),
    }
}

/// Dates travel as `YYYY-MM-DD`, the backend datetime format or RFC 3339
mod backend_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).ok_or_else(|| D::Error::custom(format!("invalid date '{raw}'")))
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_datetime(raw).map(|dt| dt.date_naive())
}
