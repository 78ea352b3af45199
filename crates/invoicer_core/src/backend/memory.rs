//! In-process backend with the hosted service's observable behaviour
//!
//! Records live in a `parking_lot::Mutex` that is never held across an await.
//! Collection rules, schema validation, relation checks, password auth and the
//! change feed behave like the hosted service, which makes this the fake
//! injected by tests and the `--memory` mode of the CLI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::StreamExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use super::{AuthResponse, Backend, BackendPage, BackendSubscription, ListQuery, RawChange, SendOptions};
use crate::error::{AdapterError, FieldError, Result};
use crate::migration::current_schema;
use crate::query::BACKEND_DATETIME_FORMAT;
use crate::record::Record;
use crate::schema::{CollectionSchema, RuleKind, RuleOutcome, SchemaSet, USERS};
use crate::session::{AuthStore, SessionClaims};

pub mod eval;

pub const DEFAULT_BASE_URL: &str = "memory://invoicer";

const ID_LENGTH: usize = 15;
const TOKEN_TTL_DAYS: i64 = 7;

fn not_found() -> AdapterError {
    AdapterError::NotFound {
        message: "The requested resource wasn't found.".to_string(),
    }
}

pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

fn now() -> String {
    Utc::now().format(BACKEND_DATETIME_FORMAT).to_string()
}

#[derive(Debug, Default)]
struct State {
    schema: SchemaSet,
    /// Per collection name, in insertion order
    records: HashMap<String, Vec<Map<String, Value>>>,
    /// Password per auth record id
    passwords: HashMap<String, String>,
}

impl State {
    fn schema(&self, collection: &str) -> Result<CollectionSchema> {
        self.schema.get(collection).cloned().ok_or_else(|| AdapterError::NotFound {
            message: format!("Missing collection context for '{collection}'."),
        })
    }

    fn rows(&self, collection: &str) -> &[Map<String, Value>] {
        self.records.get(collection).map(Vec::as_slice).unwrap_or_default()
    }

    fn find(&self, collection: &str, id: &str) -> Option<&Map<String, Value>> {
        self.rows(collection)
            .iter()
            .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
    }

    fn collection_name(&self, name_or_id: &str) -> Option<String> {
        self.schema.get(name_or_id).map(|c| c.name.clone())
    }

    /// Relation fields must point at existing records
    fn check_relations(&self, schema: &CollectionSchema, row: &Map<String, Value>) -> Vec<FieldError> {
        schema
            .data_fields()
            .filter_map(|field| {
                let crate::schema::FieldKind::Relation { collection } = &field.kind else {
                    return None;
                };
                let target = row.get(&field.name).and_then(Value::as_str)?;
                if target.is_empty() {
                    return None;
                }
                let exists = self
                    .collection_name(collection)
                    .is_some_and(|name| self.find(&name, target).is_some());
                (!exists).then(|| {
                    FieldError::new(
                        &field.name,
                        "validation_missing_rel_records",
                        "Failed to find all relation records with the provided ids.",
                    )
                })
            })
            .collect()
    }

    /// Whether any record holds a relation to `collection/id`
    fn is_referenced(&self, schema: &CollectionSchema, id: &str) -> bool {
        self.schema.collections.iter().any(|other| {
            other.relations_to(&schema.id).any(|field| {
                self.rows(&other.name)
                    .iter()
                    .any(|row| row.get(&field.name).and_then(Value::as_str) == Some(id))
            })
        })
    }
}

struct Subscriber {
    collection: String,
    tx: mpsc::UnboundedSender<RawChange>,
}

pub struct MemoryBackend {
    base_url: String,
    auth: AuthStore,
    secret: Vec<u8>,
    state: Mutex<State>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("base_url", &self.base_url)
            .field("subscribers", &self.subscribers.lock().len())
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    /// Backend with every historical migration applied
    pub fn new() -> Result<Self> {
        let schema = current_schema().map_err(|e| AdapterError::Backend {
            status: 500,
            message: e.to_string(),
        })?;
        Ok(Self::with_schema(schema))
    }

    pub fn with_schema(schema: SchemaSet) -> Self {
        let secret: Vec<u8> = rand::thread_rng().sample_iter(&Alphanumeric).take(32).collect();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: AuthStore::new(),
            secret,
            state: Mutex::new(State {
                schema,
                ..State::default()
            }),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Register an auth record in the `users` collection
    pub fn with_user(self, email: &str, password: &str, role: &str) -> Result<Self> {
        let mut payload = Map::new();
        payload.insert("email".to_string(), json!(email));
        payload.insert("name".to_string(), json!(email.split('@').next().unwrap_or(email)));
        payload.insert("role".to_string(), json!(role));
        let record = self.seed(USERS, payload)?;
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.state.lock().passwords.insert(id, password.to_string());
        Ok(self)
    }

    /// Insert a record without consulting access rules
    pub fn seed(&self, collection: &str, payload: Map<String, Value>) -> Result<Value> {
        let row = self.insert(collection, &payload)?;
        self.publish(collection, "create", &row);
        Ok(Value::Object(row))
    }

    pub fn schema(&self) -> SchemaSet {
        self.state.lock().schema.clone()
    }

    fn auth_record(&self) -> Option<Map<String, Value>> {
        if !self.auth.is_valid() {
            return None;
        }
        self.auth.record().and_then(|record| match record.to_value() {
            Value::Object(map) => Some(map),
            _ => None,
        })
    }

    fn authorize(&self, schema: &CollectionSchema, kind: RuleKind) -> Result<()> {
        let auth = self.auth_record();
        match schema.rules.evaluate(kind, auth.as_ref()) {
            RuleOutcome::Allowed => Ok(()),
            RuleOutcome::SuperusersOnly => Err(AdapterError::Forbidden {
                message: "Only superusers can perform this action.".to_string(),
            }),
            RuleOutcome::Denied if auth.is_none() => Err(AdapterError::Unauthorized {
                message: "The request requires valid record authorization token.".to_string(),
            }),
            RuleOutcome::Denied => Err(AdapterError::Forbidden {
                message: "The authorized record is not allowed to perform this action.".to_string(),
            }),
        }
    }

    fn schema_for(&self, collection: &str) -> Result<CollectionSchema> {
        self.state.lock().schema(collection)
    }

    fn insert(&self, collection: &str, payload: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut state = self.state.lock();
        let schema = state.schema(collection)?;

        let id = match payload.get("id") {
            Some(Value::String(id)) if !id.is_empty() => {
                if state.find(&schema.name, id).is_some() {
                    return Err(AdapterError::validation(
                        "Failed to create record.",
                        vec![FieldError::new("id", "validation_invalid_id", "The value must be unique.")],
                    ));
                }
                id.clone()
            }
            _ => generate_id(),
        };

        let row = schema.normalize(payload);
        check(&state, &schema, &row, "Failed to create record.")?;

        let timestamp = now();
        let mut stored = Map::new();
        stored.insert("id".to_string(), Value::String(id));
        stored.insert("collectionId".to_string(), Value::String(schema.id.clone()));
        stored.insert("collectionName".to_string(), Value::String(schema.name.clone()));
        stored.extend(row);
        stored.insert("created".to_string(), Value::String(timestamp.clone()));
        stored.insert("updated".to_string(), Value::String(timestamp));

        state
            .records
            .entry(schema.name.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn publish(&self, collection: &str, action: &str, row: &Map<String, Value>) {
        let name = self
            .state
            .lock()
            .collection_name(collection)
            .unwrap_or_else(|| collection.to_string());
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, subscriber| {
            if subscriber.collection != name {
                return true;
            }
            let change = RawChange {
                action: action.to_string(),
                record: Value::Object(row.clone()),
            };
            let open = subscriber.tx.send(change).is_ok();
            if !open {
                debug!("dropping closed subscriber {}", id);
            }
            open
        });
    }

    fn issue_token(&self, record: &Map<String, Value>) -> Result<String> {
        let claims = SessionClaims {
            id: record.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            collection_id: record
                .get("collectionId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            token_type: "auth".to_string(),
            exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp(),
            jti: Some(uuid::Uuid::new_v4().to_string()),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| AdapterError::Backend {
            status: 500,
            message: format!("failed to sign token: {e}"),
        })
    }
}

fn check(
    state: &State,
    schema: &CollectionSchema,
    row: &Map<String, Value>,
    message: &str,
) -> Result<()> {
    let mut errors = schema.validate(row).err().unwrap_or_default();
    errors.extend(state.check_relations(schema, row));
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AdapterError::validation(message, errors))
    }
}

fn invalid_query(message: &str, detail: String) -> AdapterError {
    debug!("{}: {}", message, detail);
    AdapterError::validation(message, Vec::new())
}

#[async_trait]
impl Backend for MemoryBackend {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_store(&self) -> &AuthStore {
        &self.auth
    }

    async fn get_list(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
        query: &ListQuery,
    ) -> Result<BackendPage> {
        let schema = self.schema_for(collection)?;
        self.authorize(&schema, RuleKind::List)?;

        let filter = eval::parse_filter(&query.filter)
            .map_err(|e| invalid_query("Invalid filter parameters.", e))?;
        if let Some(unknown) = filter
            .iter()
            .flat_map(|expr| expr.fields())
            .find(|field| !schema.has_field(field))
        {
            return Err(invalid_query(
                "Invalid filter parameters.",
                format!("unknown field '{unknown}'"),
            ));
        }
        let sorters = eval::parse_sort(&query.sort)
            .map_err(|e| invalid_query("Invalid sort parameters.", e))?;
        if let Some(unknown) = sorters.iter().find(|s| !schema.has_field(&s.field)) {
            return Err(invalid_query(
                "Invalid sort parameters.",
                format!("unknown field '{}'", unknown.field),
            ));
        }

        let mut matching: Vec<Map<String, Value>> = {
            let state = self.state.lock();
            state
                .rows(&schema.name)
                .iter()
                .filter(|row| filter.as_ref().is_none_or(|expr| expr.matches(row)))
                .cloned()
                .collect()
        };
        eval::sort_records(&mut matching, &sorters);

        let page = page.max(1);
        let per_page = per_page.max(1);
        let total_items = matching.len() as u64;
        let total_pages = total_items.div_ceil(per_page as u64) as u32;
        let skip = ((page - 1) as usize).saturating_mul(per_page as usize);
        let items = matching
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .map(Value::Object)
            .collect();

        Ok(BackendPage {
            page,
            per_page,
            total_items,
            total_pages,
            items,
        })
    }

    async fn get_one(&self, collection: &str, id: &str) -> Result<Value> {
        let schema = self.schema_for(collection)?;
        self.authorize(&schema, RuleKind::View)?;
        let state = self.state.lock();
        state
            .find(&schema.name, id)
            .cloned()
            .map(Value::Object)
            .ok_or_else(not_found)
    }

    async fn create(&self, collection: &str, payload: &Map<String, Value>) -> Result<Value> {
        let schema = self.schema_for(collection)?;
        self.authorize(&schema, RuleKind::Create)?;
        let row = self.insert(collection, payload)?;
        self.publish(collection, "create", &row);
        Ok(Value::Object(row))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let schema = self.schema_for(collection)?;
        if self.state.lock().find(&schema.name, id).is_none() {
            return Err(not_found());
        }
        self.authorize(&schema, RuleKind::Update)?;

        let row = {
            let mut state = self.state.lock();
            let Some(existing) = state.find(&schema.name, id).cloned() else {
                return Err(not_found());
            };
            let mut merged = existing.clone();
            for (key, value) in payload {
                if !crate::record::SYSTEM_FIELDS.contains(&key.as_str()) {
                    merged.insert(key.clone(), value.clone());
                }
            }
            let normalized = schema.normalize(&merged);
            check(&state, &schema, &normalized, "Failed to update record.")?;

            let mut stored = existing;
            stored.extend(normalized);
            stored.insert("updated".to_string(), Value::String(now()));

            if let Some(slot) = state
                .records
                .get_mut(&schema.name)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
                })
            {
                *slot = stored.clone();
            }
            stored
        };

        self.publish(collection, "update", &row);
        Ok(Value::Object(row))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let schema = self.schema_for(collection)?;
        if self.state.lock().find(&schema.name, id).is_none() {
            return Err(not_found());
        }
        self.authorize(&schema, RuleKind::Delete)?;

        let removed = {
            let mut state = self.state.lock();
            if state.is_referenced(&schema, id) {
                return Err(AdapterError::validation(
                    "Failed to delete record. Make sure that the record is not part of a required relation reference.",
                    Vec::new(),
                ));
            }
            let rows = state.records.entry(schema.name.clone()).or_default();
            let position = rows
                .iter()
                .position(|row| row.get("id").and_then(Value::as_str) == Some(id))
                .ok_or_else(not_found)?;
            let removed = rows.remove(position);
            state.passwords.remove(id);
            removed
        };

        self.publish(collection, "delete", &removed);
        Ok(())
    }

    async fn send(&self, path: &str, options: SendOptions) -> Result<Value> {
        let path = path.strip_prefix(self.base_url.as_str()).unwrap_or(path);
        match (options.method.as_str(), path.trim_end_matches('/')) {
            ("GET", "/api/health") => Ok(json!({
                "code": 200,
                "message": "API is healthy.",
                "data": {}
            })),
            _ => Err(not_found()),
        }
    }

    async fn subscribe(&self, collection: &str) -> Result<BackendSubscription> {
        let schema = self.schema_for(collection)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(
            id,
            Subscriber {
                collection: schema.name.clone(),
                tx,
            },
        );
        info!("subscribed to {}/* (subscription {})", schema.name, id);
        Ok(BackendSubscription {
            id,
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        if self.subscribers.lock().remove(&subscription_id).is_some() {
            info!("closed realtime subscription {}", subscription_id);
        }
        Ok(())
    }

    async fn auth_with_password(
        &self,
        collection: &str,
        identity: &str,
        password: &str,
    ) -> Result<AuthResponse> {
        let record = {
            let state = self.state.lock();
            let schema = state.schema(collection)?;
            if !schema.auth {
                return Err(AdapterError::validation("Failed to authenticate.", Vec::new()));
            }
            state
                .rows(&schema.name)
                .iter()
                .find(|row| {
                    row.get("email")
                        .and_then(Value::as_str)
                        .is_some_and(|email| email.eq_ignore_ascii_case(identity))
                        && row
                            .get("id")
                            .and_then(Value::as_str)
                            .and_then(|id| state.passwords.get(id))
                            .is_some_and(|stored| stored == password)
                })
                .cloned()
        };
        let Some(record) = record else {
            return Err(AdapterError::validation("Failed to authenticate.", Vec::new()));
        };

        let token = self.issue_token(&record)?;
        let value = Value::Object(record);
        self.auth.save(token.clone(), Record::from_value(value.clone())?);
        Ok(AuthResponse {
            token,
            record: value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CUSTOMERS, INVOICES};
    use pretty_assertions::assert_eq;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn signed_in(role: &str) -> MemoryBackend {
        let backend = MemoryBackend::new()
            .unwrap()
            .with_user("staff@example.com", "hunter22", role)
            .unwrap();
        backend
            .auth_with_password(USERS, "staff@example.com", "hunter22")
            .await
            .unwrap();
        backend
    }

    fn customer_payload(name: &str) -> Map<String, Value> {
        object(json!({ "name": name, "email": format!("{}@example.com", name.to_lowercase()) }))
    }

    #[test]
    fn ids_look_like_backend_ids() {
        let id = generate_id();
        assert_eq!(id.len(), 15);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let backend = MemoryBackend::new().unwrap();
        let err = backend
            .get_list(CUSTOMERS, 1, 10, &ListQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn create_fills_system_fields() {
        let backend = signed_in("admin").await;
        let created = backend.create(CUSTOMERS, &customer_payload("Acme")).await.unwrap();
        assert_eq!(created["name"], json!("Acme"));
        assert_eq!(created["collectionName"], json!(CUSTOMERS));
        assert_eq!(created["phone"], json!(""));
        assert!(created["created"].as_str().unwrap().ends_with('Z'));
        assert_eq!(created["id"].as_str().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn invoices_need_an_existing_customer() {
        let backend = signed_in("admin").await;
        let err = backend
            .create(
                INVOICES,
                &object(json!({
                    "invoice_number": "INV-001",
                    "customer": "missingcustomer",
                    "invoice_date": "2025-01-01",
                    "due_date": "2025-02-01",
                    "status": "draft",
                    "amount": 10
                })),
            )
            .await
            .unwrap_err();
        match err {
            AdapterError::Validation { fields, .. } => {
                assert_eq!(fields[0].field, "customer");
                assert_eq!(fields[0].code, "validation_missing_rel_records");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn referenced_customers_cannot_be_deleted() {
        let backend = signed_in("admin").await;
        let customer = backend.create(CUSTOMERS, &customer_payload("Acme")).await.unwrap();
        let customer_id = customer["id"].as_str().unwrap();
        backend
            .create(
                INVOICES,
                &object(json!({
                    "invoice_number": "INV-001",
                    "customer": customer_id,
                    "invoice_date": "2025-01-01",
                    "due_date": "2025-02-01",
                    "status": "sent",
                    "amount": 120
                })),
            )
            .await
            .unwrap();
        let err = backend.delete(CUSTOMERS, customer_id).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn only_admins_delete_invoices() {
        let backend = signed_in("user").await;
        let customer = backend.create(CUSTOMERS, &customer_payload("Acme")).await.unwrap();
        let invoice = backend
            .create(
                INVOICES,
                &object(json!({
                    "invoice_number": "INV-002",
                    "customer": customer["id"],
                    "invoice_date": "2025-01-01",
                    "due_date": "2025-02-01",
                    "status": "draft",
                    "amount": 5
                })),
            )
            .await
            .unwrap();
        let err = backend
            .delete(INVOICES, invoice["id"].as_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn pages_keep_the_total() {
        let backend = signed_in("admin").await;
        for name in ["Acme", "Globex", "Initech", "Umbrella", "Hooli"] {
            backend.create(CUSTOMERS, &customer_payload(name)).await.unwrap();
        }
        let query = ListQuery {
            sort: "name".to_string(),
            filter: String::new(),
        };
        let first = backend.get_list(CUSTOMERS, 1, 2, &query).await.unwrap();
        let last = backend.get_list(CUSTOMERS, 3, 2, &query).await.unwrap();
        assert_eq!(first.total_items, 5);
        assert_eq!(last.total_items, 5);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.items[0]["name"], json!("Acme"));
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0]["name"], json!("Umbrella"));
    }

    #[tokio::test]
    async fn unknown_filter_fields_are_rejected() {
        let backend = signed_in("admin").await;
        let query = ListQuery {
            sort: String::new(),
            filter: r#"nickname = "x""#.to_string(),
        };
        let err = backend.get_list(CUSTOMERS, 1, 10, &query).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: Invalid filter parameters.");
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let backend = MemoryBackend::new()
            .unwrap()
            .with_user("staff@example.com", "hunter22", "admin")
            .unwrap();
        let err = backend
            .auth_with_password(USERS, "staff@example.com", "nope")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(!backend.auth_store().is_valid());
    }

    #[tokio::test]
    async fn change_feed_reports_every_action() {
        let backend = signed_in("admin").await;
        let mut subscription = backend.subscribe(CUSTOMERS).await.unwrap();
        let created = backend.create(CUSTOMERS, &customer_payload("Acme")).await.unwrap();
        let id = created["id"].as_str().unwrap();
        backend
            .update(CUSTOMERS, id, &object(json!({ "company": "Acme Inc" })))
            .await
            .unwrap();
        backend.delete(CUSTOMERS, id).await.unwrap();

        let mut actions = Vec::new();
        for _ in 0..3 {
            actions.push(subscription.events.next().await.unwrap().action);
        }
        assert_eq!(actions, vec!["create", "update", "delete"]);

        backend.unsubscribe(subscription.id).await.unwrap();
        backend.unsubscribe(subscription.id).await.unwrap();
        assert!(subscription.events.next().await.is_none());
    }
}
