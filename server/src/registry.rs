//! In-process session directory: owns every running match on this node.

use crate::config::{MatchConfig, ServerConfig};
use crate::directory::{DirectoryError, MatchFilter, MatchListing, MatchParams, SessionDirectory};
use crate::dispatcher::MatchBroadcast;
use crate::handler::MatchHandler;
use crate::match_loop::{run_match, MatchCommand};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

/// Channels into a running match.
#[derive(Clone)]
pub struct MatchHandle {
    pub match_id: String,
    pub cmd_tx: mpsc::Sender<MatchCommand>,
    pub broadcast_tx: broadcast::Sender<MatchBroadcast>,
}

struct MatchEntry {
    handle: MatchHandle,
    label: String,
    size: usize,
    /// Terminating; hidden from listings and new joins
    closing: bool,
}

struct RegistryInner {
    node: String,
    command_buffer: usize,
    broadcast_buffer: usize,
    grace_seconds: u32,
    modules: Mutex<HashMap<String, MatchConfig>>,
    matches: Mutex<HashMap<String, MatchEntry>>,
    draining: AtomicBool,
}

/// Registry of match modules and running matches. Cheap to clone.
#[derive(Clone)]
pub struct MatchRegistry {
    inner: Arc<RegistryInner>,
}

impl MatchRegistry {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                node: config.node.clone(),
                command_buffer: config.command_buffer,
                broadcast_buffer: config.broadcast_buffer,
                grace_seconds: config.shutdown_grace_secs,
                modules: Mutex::new(HashMap::new()),
                matches: Mutex::new(HashMap::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    pub fn node(&self) -> &str {
        &self.inner.node
    }

    /// Configured migration grace period, used when a caller names none.
    pub fn grace_seconds(&self) -> u32 {
        self.inner.grace_seconds
    }

    /// Make a match type available to `create_match` under `name`.
    pub fn register_module(&self, name: &str, config: MatchConfig) {
        lock(&self.inner.modules).insert(name.to_string(), config);
        tracing::info!(module = name, "match module registered");
    }

    /// Spawn a new match of the named module. Must be called inside a tokio runtime.
    pub fn create_match(&self, module: &str, params: MatchParams) -> Result<String, DirectoryError> {
        if self.is_draining() {
            return Err(DirectoryError::Draining);
        }
        let config = lock(&self.inner.modules)
            .get(module)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownModule(module.to_string()))?;

        let match_id = format!("{}.{}", Uuid::new_v4(), self.inner.node);
        let (cmd_tx, cmd_rx) = mpsc::channel(self.inner.command_buffer);
        let (broadcast_tx, _) = broadcast::channel(self.inner.broadcast_buffer);
        let handle = MatchHandle {
            match_id: match_id.clone(),
            cmd_tx,
            broadcast_tx: broadcast_tx.clone(),
        };

        lock(&self.inner.matches).insert(
            match_id.clone(),
            MatchEntry {
                handle,
                label: String::new(),
                size: 0,
                closing: false,
            },
        );

        let span = tracing::info_span!("match", match_id = %match_id, module);
        tokio::spawn(
            run_match(
                match_id.clone(),
                MatchHandler::new(config),
                params,
                cmd_rx,
                broadcast_tx,
                self.clone(),
            )
            .instrument(span),
        );

        tracing::info!(match_id = %match_id, module, "match created");
        Ok(match_id)
    }

    /// Handle to an open match. Terminating matches are not returned.
    pub fn get(&self, match_id: &str) -> Option<MatchHandle> {
        lock(&self.inner.matches)
            .get(match_id)
            .filter(|entry| !entry.closing)
            .map(|entry| entry.handle.clone())
    }

    /// Open matches satisfying `filter`, ordered by match id.
    pub fn listings(&self, filter: &MatchFilter, limit: usize) -> Vec<MatchListing> {
        let mut listings: Vec<MatchListing> = lock(&self.inner.matches)
            .iter()
            .filter(|(_, entry)| !entry.closing)
            .map(|(id, entry)| MatchListing {
                match_id: id.clone(),
                authoritative: true,
                label: entry.label.clone(),
                size: entry.size,
            })
            .filter(|listing| filter.matches(listing))
            .collect();
        listings.sort_by(|a, b| a.match_id.cmp(&b.match_id));
        listings.truncate(limit);
        listings
    }

    pub fn match_count(&self) -> usize {
        lock(&self.inner.matches).len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    pub fn update_size(&self, match_id: &str, size: usize) {
        if let Some(entry) = lock(&self.inner.matches).get_mut(match_id) {
            entry.size = size;
        }
    }

    pub fn update_label(&self, match_id: &str, label: String) {
        if let Some(entry) = lock(&self.inner.matches).get_mut(match_id) {
            entry.label = label;
        }
    }

    pub fn mark_closing(&self, match_id: &str) {
        if let Some(entry) = lock(&self.inner.matches).get_mut(match_id) {
            entry.closing = true;
        }
    }

    pub fn remove(&self, match_id: &str) {
        lock(&self.inner.matches).remove(match_id);
    }

    /// Send an admin signal to a match and wait for its response.
    pub async fn signal(&self, match_id: &str, data: String) -> Result<String, DirectoryError> {
        let handle = self
            .get(match_id)
            .ok_or_else(|| DirectoryError::MatchNotFound(match_id.to_string()))?;
        let (response, response_rx) = oneshot::channel();
        handle
            .cmd_tx
            .send(MatchCommand::Signal { data, response })
            .await
            .map_err(|_| DirectoryError::MatchNotFound(match_id.to_string()))?;
        response_rx
            .await
            .map_err(|_| DirectoryError::MatchNotFound(match_id.to_string()))
    }

    /// Terminate a match and wait until it is gone.
    /// Returns whether its presences were redirected.
    pub async fn terminate(&self, match_id: &str, grace_seconds: u32) -> Result<bool, DirectoryError> {
        let handle = self
            .get(match_id)
            .ok_or_else(|| DirectoryError::MatchNotFound(match_id.to_string()))?;
        request_terminate(handle, grace_seconds).await
    }

    /// Stop accepting new matches and terminate every running one.
    ///
    /// Every match is hidden from listings before any of them terminates, so
    /// draining matches never pick each other as a migration target.
    pub async fn terminate_all(&self, grace_seconds: u32) {
        self.inner.draining.store(true, Ordering::SeqCst);
        let handles: Vec<MatchHandle> = lock(&self.inner.matches)
            .values_mut()
            .map(|entry| {
                entry.closing = true;
                entry.handle.clone()
            })
            .collect();
        tracing::info!(matches = handles.len(), grace_seconds, "draining matches");

        let ids: Vec<String> = handles.iter().map(|h| h.match_id.clone()).collect();
        let results = futures_util::future::join_all(
            handles
                .into_iter()
                .map(|handle| request_terminate(handle, grace_seconds)),
        )
        .await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                tracing::debug!(match_id = %id, error = %e, "match gone before drain");
            }
        }
    }
}

async fn request_terminate(handle: MatchHandle, grace_seconds: u32) -> Result<bool, DirectoryError> {
    let (done, done_rx) = oneshot::channel();
    handle
        .cmd_tx
        .send(MatchCommand::Terminate {
            grace_seconds,
            done: Some(done),
        })
        .await
        .map_err(|_| DirectoryError::MatchNotFound(handle.match_id.clone()))?;
    done_rx
        .await
        .map_err(|_| DirectoryError::MatchNotFound(handle.match_id))
}

#[async_trait]
impl SessionDirectory for MatchRegistry {
    async fn list(
        &self,
        filter: &MatchFilter,
        limit: usize,
    ) -> Result<Vec<MatchListing>, DirectoryError> {
        Ok(self.listings(filter, limit))
    }

    async fn create(&self, module: &str, params: MatchParams) -> Result<String, DirectoryError> {
        self.create_match(module, params)
    }
}

/// Lock, recovering the guard if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::Presence;

    fn registry() -> MatchRegistry {
        let registry = MatchRegistry::new(&ServerConfig::default());
        registry.register_module("match", MatchConfig::default());
        registry
    }

    fn any_filter() -> MatchFilter {
        MatchFilter {
            label: String::new(),
            min_size: 0,
            max_size: usize::MAX,
            authoritative: true,
            query: "*".to_string(),
        }
    }

    #[tokio::test]
    async fn create_assigns_node_scoped_id() {
        let registry = registry();
        let id = registry.create_match("match", MatchParams::new()).unwrap();
        assert!(id.ends_with(".node1"));
        assert!(registry.get(&id).is_some());
        assert_eq!(registry.match_count(), 1);
    }

    #[tokio::test]
    async fn unknown_module_is_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.create_match("nope", MatchParams::new()),
            Err(DirectoryError::UnknownModule(_))
        ));
    }

    #[tokio::test]
    async fn listings_respect_size_and_closing() {
        let registry = registry();
        let a = registry.create_match("match", MatchParams::new()).unwrap();
        let b = registry.create_match("match", MatchParams::new()).unwrap();
        registry.update_size(&a, 3);
        registry.update_size(&b, 1);

        let filter = MatchFilter {
            min_size: 2,
            max_size: 4,
            ..any_filter()
        };
        let listed: Vec<String> = registry
            .listings(&filter, 10)
            .into_iter()
            .map(|l| l.match_id)
            .collect();
        assert_eq!(listed, vec![a.clone()]);

        registry.mark_closing(&a);
        assert!(registry.listings(&filter, 10).is_empty());
        assert!(registry.get(&a).is_none());
    }

    #[tokio::test]
    async fn listings_truncate_to_limit() {
        let registry = registry();
        for _ in 0..3 {
            registry.create_match("match", MatchParams::new()).unwrap();
        }
        assert_eq!(registry.listings(&any_filter(), 1).len(), 1);
        assert_eq!(registry.listings(&any_filter(), 10).len(), 3);
    }

    #[tokio::test]
    async fn signal_round_trips_through_match() {
        let registry = registry();
        let id = registry.create_match("match", MatchParams::new()).unwrap();
        let reply = registry.signal(&id, "ping".to_string()).await.unwrap();
        assert_eq!(reply, "signal received: ping");
    }

    #[tokio::test]
    async fn signal_unknown_match_fails() {
        let registry = registry();
        assert!(matches!(
            registry.signal("missing.node1", "ping".to_string()).await,
            Err(DirectoryError::MatchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn terminate_migrates_to_open_match() {
        let registry = registry();
        let leaving = registry.create_match("match", MatchParams::new()).unwrap();
        let target = registry.create_match("match", MatchParams::new()).unwrap();
        registry.update_size(&target, 2);

        let handle = registry.get(&leaving).unwrap();
        let mut rx = handle.broadcast_tx.subscribe();
        handle
            .cmd_tx
            .send(MatchCommand::Join {
                presences: vec![Presence::new("u1", "s1")],
            })
            .await
            .unwrap();

        assert!(registry.terminate(&leaving, 5).await.unwrap());
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.op_code, match_shared::op_codes::MATCH_MIGRATION);
        assert_eq!(
            match_shared::protocol::parse_migration_target(&msg.data),
            Some(target.clone())
        );
        assert!(registry.get(&leaving).is_none());
        assert!(registry.get(&target).is_some());
    }

    #[tokio::test]
    async fn draining_registry_refuses_new_matches() {
        let registry = registry();
        let id = registry.create_match("match", MatchParams::new()).unwrap();

        registry.terminate_all(1).await;

        assert!(registry.is_draining());
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.match_count(), 0);
        assert!(matches!(
            registry.create_match("match", MatchParams::new()),
            Err(DirectoryError::Draining)
        ));
    }

    #[tokio::test]
    async fn drained_matches_do_not_redirect_to_each_other() {
        let registry = registry();
        let mut receivers = Vec::new();
        for n in 0..2 {
            let id = registry.create_match("match", MatchParams::new()).unwrap();
            let handle = registry.get(&id).unwrap();
            receivers.push(handle.broadcast_tx.subscribe());
            handle
                .cmd_tx
                .send(MatchCommand::Join {
                    presences: vec![
                        Presence::new(format!("u{}a", n), format!("s{}a", n)),
                        Presence::new(format!("u{}b", n), format!("s{}b", n)),
                    ],
                })
                .await
                .unwrap();
        }
        let occupied = MatchFilter {
            min_size: 2,
            max_size: 4,
            ..any_filter()
        };
        for _ in 0..100 {
            if registry.listings(&occupied, 10).len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(registry.listings(&occupied, 10).len(), 2);

        registry.terminate_all(1).await;

        for mut rx in receivers {
            assert!(matches!(
                rx.recv().await,
                Err(broadcast::error::RecvError::Closed)
            ));
        }
        assert_eq!(registry.match_count(), 0);
    }
}
