//! Broadcast hub for diff events.
//!
//! Owns the registry of live connections and the per-client delivery cursor.
//! A cursor lives exactly as long as its client's connection.
//! Each connection gets a bounded queue of framed SSE text; enqueueing never
//! blocks, and a connection whose queue is full or closed is dropped without
//! affecting anyone else.

pub mod sse;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::diff::{FileContentDiff, FileTreeDiff};
use crate::metrics;
use crate::snapshot::FileTreeNode;

pub use sse::{parse_frame, EventPayload, EventType, SseEvent, KEEP_ALIVE_FRAME};

#[derive(Debug, Clone)]
struct Connection {
    root: PathBuf,
    sender: mpsc::Sender<String>,
}

pub struct EventManager {
    connections: RwLock<HashMap<String, Connection>>,
    last_event_ids: RwLock<HashMap<String, Uuid>>,
    capacity: usize,
}

impl EventManager {
    /// Create a manager whose connection queues hold `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            last_event_ids: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a connection for `client_id` watching `root`.
    ///
    /// Re-registering an id replaces the previous connection, whose receiver
    /// then sees the end of its stream.
    pub fn add_connection(&self, client_id: &str, root: &Path) -> mpsc::Receiver<String> {
        self.register(client_id, root, None)
    }

    /// Register a connection whose queue starts with an `initial` snapshot.
    ///
    /// Registration and the first enqueue happen under one lock, so no diff
    /// can overtake the snapshot.
    pub fn add_connection_with_snapshot(
        &self,
        client_id: &str,
        root: &Path,
        tree: FileTreeNode,
    ) -> mpsc::Receiver<String> {
        self.register(client_id, root, Some(SseEvent::new(EventPayload::Tree(tree))))
    }

    fn register(
        &self,
        client_id: &str,
        root: &Path,
        initial: Option<SseEvent>,
    ) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(self.capacity);

        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(event) = initial {
            match event.to_frame() {
                Ok(frame) => {
                    // fresh queue with capacity >= 1
                    if sender.try_send(frame).is_ok() {
                        self.store_cursor(client_id, event.event_id);
                        metrics::EVENTS_INITIAL.inc();
                    }
                }
                Err(e) => error!("Failed to serialize initial snapshot: {}", e),
            }
        }

        let replaced = connections
            .insert(
                client_id.to_string(),
                Connection {
                    root: root.to_path_buf(),
                    sender,
                },
            )
            .is_some();
        metrics::ACTIVE_CONNECTIONS.set(connections.len() as f64);
        drop(connections);

        if replaced {
            info!("Replaced connection for client {}", client_id);
        } else {
            info!("Added connection for client {} on {}", client_id, root.display());
        }

        receiver
    }

    /// Deregister a client. Safe to call repeatedly.
    pub fn remove_connection(&self, client_id: &str) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = connections.remove(client_id).is_some();
        if removed {
            self.discard_cursor(client_id);
        }
        metrics::ACTIVE_CONNECTIONS.set(connections.len() as f64);
        drop(connections);

        if removed {
            info!("Removed connection for client {}", client_id);
        }
        removed
    }

    /// Remove `client_id` only if it is still backed by `sender`
    fn remove_if_same(&self, client_id: &str, sender: &mpsc::Sender<String>) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if connections
            .get(client_id)
            .is_some_and(|c| c.sender.same_channel(sender))
        {
            connections.remove(client_id);
            self.discard_cursor(client_id);
            metrics::CONNECTIONS_DROPPED.inc();
        }
        metrics::ACTIVE_CONNECTIONS.set(connections.len() as f64);
    }

    pub fn send_tree_diff(&self, root: &Path, diff: FileTreeDiff) -> usize {
        debug!(
            "Tree diff for {}: +{} -{} ~{} >{}",
            root.display(),
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len(),
            diff.moved.len()
        );
        let delivered = self.broadcast(root, SseEvent::new(EventPayload::TreeDiff(diff)));
        metrics::EVENTS_TREE_DIFF.inc();
        delivered
    }

    pub fn send_content_diff(&self, root: &Path, diff: FileContentDiff) -> usize {
        debug!("Content diff for {} in {}", diff.path, root.display());
        let delivered = self.broadcast(root, SseEvent::new(EventPayload::ContentDiff(diff)));
        metrics::EVENTS_CONTENT_DIFF.inc();
        delivered
    }

    /// Send an `initial` snapshot to every connection on `root`
    pub fn broadcast_initial(&self, root: &Path, tree: FileTreeNode) -> usize {
        let delivered = self.broadcast(root, SseEvent::new(EventPayload::Tree(tree)));
        metrics::EVENTS_INITIAL.inc();
        delivered
    }

    /// Enqueue `event` on every connection watching `root`.
    ///
    /// Returns the number of connections that accepted it.
    fn broadcast(&self, root: &Path, event: SseEvent) -> usize {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.event_type, e);
                return 0;
            }
        };

        // snapshot the targets so no lock is held while sending
        let targets: Vec<(String, mpsc::Sender<String>)> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, c)| c.root == root)
            .map(|(id, c)| (id.clone(), c.sender.clone()))
            .collect();

        if targets.is_empty() {
            debug!("No connections for {}, dropping {} event", root.display(), event.event_type);
            return 0;
        }

        let mut delivered = 0;
        for (client_id, sender) in &targets {
            match sender.try_send(frame.clone()) {
                Ok(()) => {
                    self.record_delivery(client_id, sender, event.event_id);
                    delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Queue full for client {}, dropping connection", client_id);
                    self.remove_if_same(client_id, sender);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Connection closed for client {}, removing", client_id);
                    self.remove_if_same(client_id, sender);
                }
            }
        }

        metrics::BROADCAST_FANOUT.observe(delivered as f64);
        delivered
    }

    pub fn last_event_id(&self, client_id: &str) -> Option<Uuid> {
        self.last_event_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .copied()
    }

    /// Move the cursor of a connected client. Unknown clients are ignored.
    pub fn set_last_event_id(&self, client_id: &str, event_id: Uuid) {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if connections.contains_key(client_id) {
            self.store_cursor(client_id, event_id);
        }
    }

    /// Advance the cursor unless the connection went away during fan-out
    fn record_delivery(&self, client_id: &str, sender: &mpsc::Sender<String>, event_id: Uuid) {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if connections
            .get(client_id)
            .is_some_and(|c| c.sender.same_channel(sender))
        {
            self.store_cursor(client_id, event_id);
        }
    }

    // callers hold the connections lock, always taken before this one
    fn store_cursor(&self, client_id: &str, event_id: Uuid) {
        self.last_event_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id.to_string(), event_id);
    }

    fn discard_cursor(&self, client_id: &str) {
        self.last_event_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client_id);
    }

    /// Number of clients with a recorded delivery cursor
    pub fn cursor_count(&self) -> usize {
        self.last_event_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(client_id)
    }

    /// Client ids currently registered for `root`
    pub fn connections_for(&self, root: &Path) -> Vec<String> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, c)| c.root == root)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
