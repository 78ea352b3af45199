//! Boundary to the hosted backend service
//!
//! Adapters never talk to the network directly. They hold an
//! `Arc<dyn Backend>` constructed once at startup, so tests and demos can
//! inject [`MemoryBackend`] where production uses [`PocketBaseClient`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::session::AuthStore;

pub mod http;
pub mod memory;

pub use http::PocketBaseClient;
pub use memory::MemoryBackend;

/// Pre-rendered sort and filter expressions for a paged query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub sort: String,
    pub filter: String,
}

/// List envelope as the backend returns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPage {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    #[serde(default)]
    pub total_pages: u32,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            method: reqwest::Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }
}

/// One change-feed frame before any validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub action: String,
    pub record: Value,
}

pub struct BackendSubscription {
    pub id: u64,
    pub events: BoxStream<'static, RawChange>,
}

impl std::fmt::Debug for BackendSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub record: Value,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn base_url(&self) -> &str;

    fn auth_store(&self) -> &AuthStore;

    async fn get_list(
        &self,
        collection: &str,
        page: u32,
        per_page: u32,
        query: &ListQuery,
    ) -> Result<BackendPage>;

    async fn get_one(&self, collection: &str, id: &str) -> Result<Value>;

    async fn create(&self, collection: &str, payload: &Map<String, Value>) -> Result<Value>;

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Generic passthrough to an arbitrary backend path
    async fn send(&self, path: &str, options: SendOptions) -> Result<Value>;

    /// Open a change feed covering every action on the collection
    async fn subscribe(&self, collection: &str) -> Result<BackendSubscription>;

    /// Tear down a change feed; unknown ids are ignored
    async fn unsubscribe(&self, subscription_id: u64) -> Result<()>;

    /// Exchange credentials for a token and store the session
    async fn auth_with_password(
        &self,
        collection: &str,
        identity: &str,
        password: &str,
    ) -> Result<AuthResponse>;
}
