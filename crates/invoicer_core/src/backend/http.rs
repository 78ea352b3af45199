//! PocketBase REST and realtime client

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde_json::{Map, Value, json};
use sse_stream::{Sse, SseStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use super::{AuthResponse, Backend, BackendPage, BackendSubscription, ListQuery, RawChange, SendOptions};
use crate::config::BackendConfig;
use crate::error::{AdapterError, Result};
use crate::record::Record;
use crate::session::AuthStore;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// First event on every realtime connection, carries the client id
const CONNECT_EVENT: &str = "PB_CONNECT";
const REALTIME_PATH: &str = "/api/realtime";

type FrameStream = BoxStream<'static, std::result::Result<Sse, sse_stream::Error>>;

/// Open realtime tasks by subscription id
type RealtimeTasks = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

pub struct PocketBaseClient {
    base_url: String,
    http: Client,
    timeout: Duration,
    auth: AuthStore,
    realtime: RealtimeTasks,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for PocketBaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketBaseClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("subscriptions", &self.active_subscriptions())
            .finish()
    }
}

impl PocketBaseClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| {
            AdapterError::invalid_request(format!("invalid backend url '{base_url}': {e}"))
        })?;

        // No client-wide timeout: realtime connections stay open indefinitely
        let http = Client::builder()
            .user_agent(concat!("invoicer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(AdapterError::transport)?;

        Ok(Self {
            base_url,
            http,
            timeout,
            auth: AuthStore::new(),
            realtime: RealtimeTasks::default(),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Realtime streams that are still open
    pub fn active_subscriptions(&self) -> usize {
        self.realtime.lock().len()
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::with_timeout(&config.url, Duration::from_secs(config.timeout_secs))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AdapterError::invalid_request(format!("invalid backend url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AdapterError::invalid_request("backend url cannot hold a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn records_url(&self, collection: &str, id: Option<&str>) -> Result<Url> {
        match id {
            Some(id) => self.endpoint(&["api", "collections", collection, "records", id]),
            None => self.endpoint(&["api", "collections", collection, "records"]),
        }
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };
        Url::parse(&raw).map_err(|e| AdapterError::invalid_request(format!("invalid url '{raw}': {e}")))
    }

    /// Request with the stored token attached, bounded by the configured timeout
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url).timeout(self.timeout);
        match self.auth.token() {
            Some(token) => builder.header(AUTHORIZATION, token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder.send().await.map_err(AdapterError::transport)?;
        read_body(response).await
    }

    /// Open the event stream and wait for the connect handshake
    async fn connect_realtime(&self) -> Result<(String, FrameStream)> {
        let url = self.endpoint(&["api", "realtime"])?;
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(AdapterError::transport)?;
        if !response.status().is_success() {
            return Err(read_body(response).await.err().unwrap_or_else(|| {
                AdapterError::malformed("realtime endpoint refused the stream", Value::Null)
            }));
        }

        let mut frames = SseStream::from_byte_stream(response.bytes_stream()).boxed();
        let handshake = async {
            while let Some(frame) = frames.next().await {
                let frame = frame.map_err(|e| AdapterError::Transport {
                    message: format!("realtime stream error: {e}"),
                    cause: None,
                })?;
                if frame.event.as_deref() != Some(CONNECT_EVENT) {
                    continue;
                }
                let data = frame.data.unwrap_or_default();
                let payload: Value = serde_json::from_str(&data)
                    .map_err(|e| AdapterError::malformed(format!("invalid connect event: {e}"), Value::String(data.clone())))?;
                return match payload.get("clientId").and_then(Value::as_str) {
                    Some(id) if !id.is_empty() => Ok(id.to_string()),
                    _ => Err(AdapterError::malformed("connect event without clientId", payload)),
                };
            }
            Err::<String, AdapterError>(AdapterError::Transport {
                message: "realtime stream closed before connecting".to_string(),
                cause: None,
            })
        };

        let client_id = tokio::time::timeout(self.timeout, handshake)
            .await
            .map_err(|_| AdapterError::Transport {
                message: format!("no realtime handshake within {:?}", self.timeout),
                cause: None,
            })??;
        Ok((client_id, frames))
    }
}

async fn read_body(response: Response) -> Result<Value> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(AdapterError::transport)?;
    if status.is_success() {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(&bytes).map_err(|e| {
            AdapterError::malformed(
                format!("response is not JSON: {e}"),
                Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            )
        });
    }
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Err(AdapterError::from_status(status.as_u16(), &body))
}

fn query_params(page: u32, per_page: u32, query: &ListQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("page", page.to_string()), ("perPage", per_page.to_string())];
    if !query.sort.is_empty() {
        params.push(("sort", query.sort.clone()));
    }
    if !query.filter.is_empty() {
        params.push(("filter", query.filter.clone()));
    }
    params
}

#[async_trait]
impl Backend for PocketBaseClient {
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
        let url = self.records_url(collection, None)?;
        let builder = self
            .request(Method::GET, url)
            .query(&query_params(page, per_page, query));
        let body = self.execute(builder).await?;
        serde_json::from_value(body.clone())
            .map_err(|e| AdapterError::malformed(format!("invalid list envelope: {e}"), body))
    }

    async fn get_one(&self, collection: &str, id: &str) -> Result<Value> {
        let url = self.records_url(collection, Some(id))?;
        self.execute(self.request(Method::GET, url)).await
    }

    async fn create(&self, collection: &str, payload: &Map<String, Value>) -> Result<Value> {
        let url = self.records_url(collection, None)?;
        self.execute(self.request(Method::POST, url).json(payload)).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let url = self.records_url(collection, Some(id))?;
        self.execute(self.request(Method::PATCH, url).json(payload)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.records_url(collection, Some(id))?;
        self.execute(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn send(&self, path: &str, options: SendOptions) -> Result<Value> {
        let url = self.resolve(path)?;
        let mut builder = self.request(options.method, url);
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }
        self.execute(builder).await
    }

    async fn subscribe(&self, collection: &str) -> Result<BackendSubscription> {
        let (client_id, mut frames) = self.connect_realtime().await?;
        let topic = format!("{collection}/*");

        let url = self.resolve(REALTIME_PATH)?;
        let body = json!({ "clientId": client_id, "subscriptions": [topic] });
        self.execute(self.request(Method::POST, url).json(&body))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task_topic = topic.clone();
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.realtime);

        // Held across the spawn so the task cannot deregister before it is registered
        {
            let mut open = self.realtime.lock();
            let handle = tokio::spawn(async move {
                while let Some(frame) = frames.next().await {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            crate::log_error!(format!("realtime stream for {task_topic} failed"), e);
                            break;
                        }
                    };
                    if frame.event.as_deref() != Some(task_topic.as_str()) {
                        continue;
                    }
                    let Some(data) = frame.data else { continue };
                    match serde_json::from_str::<RawChange>(&data) {
                        Ok(change) => {
                            if tx.send(change).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("dropping malformed realtime frame on {}: {}", task_topic, e),
                    }
                }
                tasks.lock().remove(&id);
                debug!("realtime stream for {} closed", task_topic);
            });
            open.insert(id, handle);
        }
        info!("subscribed to {} (subscription {})", topic, id);

        Ok(BackendSubscription {
            id,
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        if let Some(handle) = self.realtime.lock().remove(&subscription_id) {
            handle.abort();
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
        let url = self.endpoint(&["api", "collections", collection, "auth-with-password"])?;
        let builder = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&json!({ "identity": identity, "password": password }));
        let body = self.execute(builder).await?;
        let auth: AuthResponse = serde_json::from_value(body.clone())
            .map_err(|e| AdapterError::malformed(format!("invalid auth response: {e}"), body))?;
        let record = Record::from_value(auth.record.clone())?;
        self.auth.save(auth.token.clone(), record);
        Ok(auth)
    }
}

impl Drop for PocketBaseClient {
    fn drop(&mut self) {
        for (_, handle) in self.realtime.lock().drain() {
            handle.abort();
        }
    }
}
