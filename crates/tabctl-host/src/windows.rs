use crate::commander::{Commander, CommanderError, HandlerResult};
use crate::compositor::Compositor;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tabctl_core::{tree::ContainerId, wire::window_id_from_value, WindowId};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const REQUEST_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    pub container_id: ContainerId,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Tree polls after enabling a marker before giving up.
    pub identify_attempts: u32,
    pub identify_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            identify_attempts: 5,
            identify_delay: Duration::from_millis(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("window resolver stopped")]
    Stopped,
}

/// Controller side of the identify handshake.
#[async_trait]
pub trait MarkerControl: Send + Sync {
    /// Asks the controller to mark `window`. Returns the identifier to look
    /// for in container names.
    async fn enable_marker(&self, window: WindowId, marker: &str) -> Result<String, CommanderError>;
    async fn disable_marker(&self, window: WindowId) -> Result<(), CommanderError>;
}

#[async_trait]
impl MarkerControl for Commander {
    async fn enable_marker(&self, window: WindowId, marker: &str) -> Result<String, CommanderError> {
        let reply = self
            .request(
                "enable_identify_marker",
                json!({"windowId": window, "marker": marker}),
            )
            .await?;
        Ok(identifier_from_results(&reply.message.results).unwrap_or_else(|| marker.to_string()))
    }

    async fn disable_marker(&self, window: WindowId) -> Result<(), CommanderError> {
        self.send_command("disable_identify_marker", json!({"windowId": window}), None)
            .await
            .map(|_| ())
    }
}

fn identifier_from_results(results: &Value) -> Option<String> {
    let raw = match results {
        Value::String(text) => text.as_str(),
        Value::Object(map) => map.get("identifier").and_then(Value::as_str)?,
        _ => return None,
    };
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn new_marker() -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("tabctl-{}", &token[..8])
}

enum ResolverRequest {
    Ensure {
        windows: Vec<WindowId>,
        reply: oneshot::Sender<HashMap<WindowId, WindowRecord>>,
    },
    Lookup {
        window: WindowId,
        reply: oneshot::Sender<Option<WindowRecord>>,
    },
    Forget {
        window: WindowId,
    },
    Snapshot {
        reply: oneshot::Sender<HashMap<WindowId, WindowRecord>>,
    },
}

/// Handle to the actor that owns the browser window to container map.
/// Unknown windows are identified one at a time. Cheap to clone.
#[derive(Clone)]
pub struct WindowResolver {
    tx: mpsc::Sender<ResolverRequest>,
}

impl WindowResolver {
    pub fn spawn(
        markers: Arc<dyn MarkerControl>,
        compositor: Arc<dyn Compositor>,
        config: ResolverConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let actor = ResolverActor {
            markers,
            compositor,
            config,
            records: HashMap::new(),
        };
        (Self { tx }, tokio::spawn(actor.run(rx)))
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ResolverRequest,
    ) -> Result<T, ResolveError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ResolveError::Stopped)?;
        rx.await.map_err(|_| ResolveError::Stopped)
    }

    /// Identifies every window in `windows` that is not yet known, one after
    /// another, and returns the records of all requested windows that are
    /// resolved afterwards.
    pub async fn ensure_resolved(
        &self,
        windows: &[WindowId],
    ) -> Result<HashMap<WindowId, WindowRecord>, ResolveError> {
        let windows = windows.to_vec();
        self.call(|reply| ResolverRequest::Ensure { windows, reply })
            .await
    }

    /// Container for an already resolved window. Never starts a handshake.
    pub async fn resolve_focus_target(
        &self,
        window: WindowId,
    ) -> Result<Option<ContainerId>, ResolveError> {
        let record = self
            .call(|reply| ResolverRequest::Lookup { window, reply })
            .await?;
        Ok(record.map(|record| record.container_id))
    }

    pub async fn forget(&self, window: WindowId) -> Result<(), ResolveError> {
        self.tx
            .send(ResolverRequest::Forget { window })
            .await
            .map_err(|_| ResolveError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<HashMap<WindowId, WindowRecord>, ResolveError> {
        self.call(|reply| ResolverRequest::Snapshot { reply }).await
    }
}

struct ResolverActor {
    markers: Arc<dyn MarkerControl>,
    compositor: Arc<dyn Compositor>,
    config: ResolverConfig,
    records: HashMap<WindowId, WindowRecord>,
}

impl ResolverActor {
    async fn run(mut self, mut rx: mpsc::Receiver<ResolverRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                ResolverRequest::Ensure { windows, reply } => {
                    let resolved = self.ensure(&windows).await;
                    let _ = reply.send(resolved);
                }
                ResolverRequest::Lookup { window, reply } => {
                    let _ = reply.send(self.records.get(&window).copied());
                }
                ResolverRequest::Forget { window } => {
                    if self.records.remove(&window).is_some() {
                        info!(event = "window_forgotten", window);
                    }
                }
                ResolverRequest::Snapshot { reply } => {
                    let _ = reply.send(self.records.clone());
                }
            }
        }
        debug!(event = "window_resolver_stopped", known = self.records.len());
    }

    async fn ensure(&mut self, windows: &[WindowId]) -> HashMap<WindowId, WindowRecord> {
        let mut resolved = HashMap::new();
        let mut seen = HashSet::new();
        for &window in windows {
            if !seen.insert(window) {
                continue;
            }
            let record = match self.records.get(&window) {
                Some(record) => Some(*record),
                None => self.identify(window).await,
            };
            if let Some(record) = record {
                self.records.insert(window, record);
                resolved.insert(window, record);
            }
        }
        resolved
    }

    async fn identify(&self, window: WindowId) -> Option<WindowRecord> {
        let marker = new_marker();
        debug!(event = "identify_start", window, marker = %marker);

        let found = match self.markers.enable_marker(window, &marker).await {
            Ok(identifier) => self.find_marked(&identifier).await,
            Err(err) => {
                warn!(event = "identify_enable_failed", window, error = %err);
                None
            }
        };
        if let Err(err) = self.markers.disable_marker(window).await {
            warn!(event = "identify_disable_failed", window, error = %err);
        }

        match found {
            Some(container_id) => {
                info!(event = "window_identified", window, container_id);
                Some(WindowRecord { container_id })
            }
            None => {
                warn!(event = "window_unresolved", window);
                None
            }
        }
    }

    async fn find_marked(&self, identifier: &str) -> Option<ContainerId> {
        let attempts = self.config.identify_attempts.max(1);
        for attempt in 1..=attempts {
            match self.compositor.get_tree().await {
                Ok(tree) => {
                    if let Some(node) = tree.find_window_by_marker(identifier) {
                        return Some(node.id);
                    }
                }
                Err(err) => warn!(event = "identify_tree_failed", attempt, error = %err),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.identify_delay).await;
            }
        }
        None
    }
}

/// Subscribes to window-close pushes and drops the matching records.
pub async fn watch_window_closures(
    commander: &Commander,
    resolver: WindowResolver,
) -> Result<u64, CommanderError> {
    commander
        .subscribe("subscribe_window_closed", json!({}), move |message| {
            let resolver = resolver.clone();
            async move {
                match window_id_from_value(&message.results) {
                    Some(window) => resolver.forget(window).await?,
                    None => debug!(event = "window_closed_unparsed", results = %message.results),
                }
                HandlerResult::Ok(())
            }
        })
        .await
}
