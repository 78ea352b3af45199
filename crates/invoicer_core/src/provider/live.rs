//! Realtime change feed republished to a generic callback

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Backend, RawChange};
use crate::error::{AdapterError, Result};
use crate::record::Record;

/// Prefix carried by channel names, stripped before use
pub const CHANNEL_PREFIX: &str = "resources/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl FromStr for ChangeAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            other => Err(format!("unknown change action '{other}'")),
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which actions reach the callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActionFilter {
    #[default]
    All,
    Only(HashSet<ChangeAction>),
}

impl ActionFilter {
    pub fn only(actions: impl IntoIterator<Item = ChangeAction>) -> Self {
        ActionFilter::Only(actions.into_iter().collect())
    }

    /// Parse action tags, where `*` or `all` anywhere means every action
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut actions = HashSet::new();
        for tag in tags {
            if tag == "*" || tag == "all" {
                return Ok(ActionFilter::All);
            }
            actions.insert(tag.parse().map_err(AdapterError::invalid_request)?);
        }
        Ok(ActionFilter::Only(actions))
    }

    pub fn accepts(&self, action: ChangeAction) -> bool {
        match self {
            ActionFilter::All => true,
            ActionFilter::Only(actions) => actions.contains(&action),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveParams {
    /// Restrict delivery to these record ids
    pub ids: Option<HashSet<String>>,
}

impl LiveParams {
    pub fn ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub resource: String,
    pub action: ChangeAction,
    pub record: Record,
}

pub fn resource_from_channel(channel: &str) -> &str {
    channel.strip_prefix(CHANNEL_PREFIX).unwrap_or(channel)
}

/// Delivery predicate applied to every event of a subscription
pub fn matches(filter: &ActionFilter, params: &LiveParams, event: &ChangeEvent) -> bool {
    filter.accepts(event.action)
        && params
            .ids
            .as_ref()
            .is_none_or(|ids| ids.contains(event.record.id()))
}

fn decode(resource: &str, raw: RawChange) -> Option<ChangeEvent> {
    let action = match raw.action.parse() {
        Ok(action) => action,
        Err(e) => {
            warn!("dropping {} event: {}", resource, e);
            return None;
        }
    };
    match Record::from_value(raw.record) {
        Ok(record) => Some(ChangeEvent {
            resource: resource.to_string(),
            action,
            record,
        }),
        Err(e) => {
            warn!("dropping {} {} event: {}", resource, action, e);
            None
        }
    }
}

/// Handle returned by [`LiveProvider::subscribe`]
///
/// Dropping the handle does not stop delivery; call
/// [`LiveProvider::unsubscribe`].
#[derive(Debug)]
pub struct LiveSubscription {
    backend_id: u64,
    resource: String,
    /// Held while a callback runs, so teardown waits for an in-flight dispatch
    active: Arc<AsyncMutex<bool>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LiveSubscription {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub async fn is_active(&self) -> bool {
        *self.active.lock().await
    }
}

#[derive(Clone)]
pub struct LiveProvider {
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for LiveProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveProvider")
            .field("api_url", &self.backend.base_url())
            .finish()
    }
}

impl LiveProvider {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Open one backend subscription for the channel's resource and deliver
    /// matching events in backend order
    pub async fn subscribe<F>(
        &self,
        channel: &str,
        filter: ActionFilter,
        params: LiveParams,
        callback: F,
    ) -> Result<LiveSubscription>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let resource = resource_from_channel(channel).to_string();
        if resource.trim().is_empty() {
            return Err(AdapterError::invalid_request("channel names no resource"));
        }

        let subscription = self.backend.subscribe(&resource).await?;
        let backend_id = subscription.id;
        let mut events = subscription.events;
        let active = Arc::new(AsyncMutex::new(true));

        let gate = Arc::clone(&active);
        let task_resource = resource.clone();
        let task = tokio::spawn(async move {
            while let Some(raw) = events.next().await {
                let Some(event) = decode(&task_resource, raw) else {
                    continue;
                };
                if !matches(&filter, &params, &event) {
                    continue;
                }
                let open = gate.lock().await;
                if !*open {
                    break;
                }
                callback(event);
            }
            debug!("live dispatch for {} finished", task_resource);
        });

        info!("live subscription opened for {}", resource);
        Ok(LiveSubscription {
            backend_id,
            resource,
            active,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// Tear down a subscription; repeated calls are no-ops
    pub async fn unsubscribe(&self, subscription: &LiveSubscription) -> Result<()> {
        {
            let mut open = subscription.active.lock().await;
            if !*open {
                return Ok(());
            }
            *open = false;
        }
        if let Some(task) = subscription.task.lock().take() {
            task.abort();
        }
        info!("live subscription closed for {}", subscription.resource);
        self.backend.unsubscribe(subscription.backend_id).await
    }
}
