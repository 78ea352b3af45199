//! Generic list/read/write contract over the backend
//!
//! Every call maps to exactly one backend call (`get_many` issues one per id),
//! and every backend error surfaces unchanged.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::backend::{Backend, ListQuery, SendOptions};
use crate::error::{AdapterError, Result};
use crate::query::{ListRequest, ListResult, ValueRendering, render_filter, render_sort};
use crate::record::Record;

/// Arbitrary request forwarded to the backend transport
#[derive(Debug, Clone)]
pub struct CustomRequest {
    /// Absolute url or a path relative to the backend base address
    pub url: String,
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    pub payload: Option<Value>,
}

impl CustomRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::GET,
            headers: Vec::new(),
            payload: None,
        }
    }
}

#[derive(Clone)]
pub struct DataProvider {
    backend: Arc<dyn Backend>,
    rendering: ValueRendering,
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("api_url", &self.backend.base_url())
            .field("rendering", &self.rendering)
            .finish()
    }
}

fn require_resource(resource: &str) -> Result<()> {
    if resource.trim().is_empty() {
        return Err(AdapterError::invalid_request("resource name must not be empty"));
    }
    Ok(())
}

fn into_record(value: Value) -> Result<Record> {
    Record::from_value(value).inspect_err(|e| {
        tracing::warn!("rejecting backend record: {}", e);
    })
}

impl DataProvider {
    pub fn new(backend: Arc<dyn Backend>, rendering: ValueRendering) -> Self {
        Self { backend, rendering }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn rendering(&self) -> ValueRendering {
        self.rendering
    }

    pub async fn list(&self, request: &ListRequest) -> Result<ListResult> {
        require_resource(&request.resource)?;
        let pagination = request.effective_pagination();
        let query = ListQuery {
            sort: render_sort(&request.sorters),
            filter: render_filter(&request.filters, self.rendering),
        };
        debug!(
            resource = %request.resource,
            page = pagination.current,
            per_page = pagination.page_size,
            sort = %query.sort,
            filter = %query.filter,
            "list"
        );

        let page = self
            .backend
            .get_list(
                &request.resource,
                pagination.current,
                pagination.page_size,
                &query,
            )
            .await?;

        let data = page
            .items
            .into_iter()
            .map(into_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(ListResult {
            data,
            total: page.total_items,
        })
    }

    pub async fn get_one(&self, resource: &str, id: &str) -> Result<Record> {
        require_resource(resource)?;
        debug!(resource, id, "get_one");
        let value = self.backend.get_one(resource, id).await?;
        into_record(value)
    }

    /// One `get_one` per id, results in the order requested
    pub async fn get_many(&self, resource: &str, ids: &[String]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.get_one(resource, id).await?);
        }
        Ok(records)
    }

    pub async fn create(&self, resource: &str, payload: &Map<String, Value>) -> Result<Record> {
        require_resource(resource)?;
        debug!(resource, fields = payload.len(), "create");
        let value = self.backend.create(resource, payload).await?;
        into_record(value)
    }

    pub async fn update(
        &self,
        resource: &str,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<Record> {
        require_resource(resource)?;
        debug!(resource, id, fields = payload.len(), "update");
        let value = self.backend.update(resource, id, payload).await?;
        into_record(value)
    }

    /// Returns the deleted id
    pub async fn delete_one(&self, resource: &str, id: &str) -> Result<String> {
        require_resource(resource)?;
        debug!(resource, id, "delete_one");
        self.backend.delete(resource, id).await?;
        Ok(id.to_string())
    }

    pub fn api_url(&self) -> &str {
        self.backend.base_url()
    }

    /// Raw passthrough, the response body is returned as-is
    pub async fn custom(&self, request: CustomRequest) -> Result<Value> {
        debug!(url = %request.url, method = %request.method, "custom");
        self.backend
            .send(
                &request.url,
                SendOptions {
                    method: request.method,
                    headers: request.headers,
                    body: request.payload,
                },
            )
            .await
    }
}
