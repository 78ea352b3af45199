//! Invoicer Core Library
//!
//! Data-access, realtime and identity adapters for the invoicing admin
//! panel, translating a generic list/read/write/subscribe contract into the
//! PocketBase REST and realtime API.

pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod migration;
pub mod provider;
pub mod query;
pub mod record;
pub mod schema;
pub mod session;
pub mod utils;

pub use backend::{Backend, MemoryBackend, PocketBaseClient};
pub use config::{ConfigError, InvoicerConfig};
pub use error::{AdapterError, FieldError, HttpStatus, Result};
pub use provider::{AuthProvider, DataProvider, LiveProvider};
pub use query::{FilterOperator, FilterPredicate, ListRequest, ListResult, Pagination, SortOrder, SortSpec, ValueRendering};
pub use record::{Customer, Invoice, InvoiceStatus, Record};
pub use session::AuthStore;

use std::sync::Arc;

/// The three adapters wired to one shared backend client
#[derive(Debug, Clone)]
pub struct Providers {
    pub data: DataProvider,
    pub live: LiveProvider,
    pub auth: AuthProvider,
}

impl Providers {
    pub fn new(backend: Arc<dyn Backend>, config: &InvoicerConfig) -> Self {
        Self {
            data: DataProvider::new(Arc::clone(&backend), config.backend.filter_values),
            live: LiveProvider::new(Arc::clone(&backend)),
            auth: AuthProvider::new(
                backend,
                config.routes.clone(),
                config.backend.auth_collection.clone(),
            ),
        }
    }
}
