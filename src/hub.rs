//! Shared watch sessions keyed by canonical root.
//!
//! Every subscriber of a root shares one `FileWatcher`. The watcher starts
//! with the first subscription and stops when the last lease is released.

use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WatcherConfig;
use crate::events::EventManager;
use crate::snapshot::SnapshotBuilder;
use crate::watcher::{FileWatcher, PathFilter, WatchError};

struct RootSession {
    watcher: FileWatcher,
    subscribers: HashSet<String>,
}

struct Lease {
    root: PathBuf,
    id: Uuid,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<PathBuf, RootSession>,
    clients: HashMap<String, Lease>,
}

/// Outcome of releasing a client's lease
enum Release {
    NotHeld,
    /// Carries the session when its last subscriber just left
    Released(Option<RootSession>),
}

struct HubInner {
    config: WatcherConfig,
    events: Arc<EventManager>,
    /// Serializes subscribes; never held by release paths
    starting: Mutex<()>,
    state: Mutex<HubState>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop `client_id` from its session.
    ///
    /// With `lease` set, only that exact lease is released. A session left
    /// without subscribers is removed and handed back so the caller can stop
    /// its watcher after unlocking.
    fn release(&self, state: &mut HubState, client_id: &str, lease: Option<Uuid>) -> Release {
        match state.clients.get(client_id) {
            Some(current) if lease.map_or(true, |id| id == current.id) => {}
            _ => return Release::NotHeld,
        }
        let Some(current) = state.clients.remove(client_id) else {
            return Release::NotHeld;
        };

        self.events.remove_connection(client_id);

        let now_empty = match state.sessions.get_mut(&current.root) {
            Some(session) => {
                session.subscribers.remove(client_id);
                session.subscribers.is_empty()
            }
            None => false,
        };

        if !now_empty {
            return Release::Released(None);
        }
        info!("Last subscriber left {}, stopping watcher", current.root.display());
        Release::Released(state.sessions.remove(&current.root))
    }

    fn grant(&self, state: &mut HubState, client_id: &str, root: &Path) -> Uuid {
        let id = Uuid::new_v4();
        state.clients.insert(
            client_id.to_string(),
            Lease {
                root: root.to_path_buf(),
                id,
            },
        );
        id
    }

    /// Join a running session, or `None` when it stopped in the meantime
    fn join_session(&self, client_id: &str, root: &Path) -> Option<(mpsc::Receiver<String>, Uuid)> {
        let snapshot =
            SnapshotBuilder::new(root.to_path_buf(), PathFilter::new(&self.config.ignore_patterns));
        // walked before locking; the lock only covers registration
        let tree = snapshot.tree();

        let mut state = self.lock();
        let session = state.sessions.get_mut(root)?;
        session.subscribers.insert(client_id.to_string());

        let receiver = match tree {
            Ok(tree) => self
                .events
                .add_connection_with_snapshot(client_id, root, tree),
            Err(e) => {
                warn!("Failed to build snapshot for {}: {:#}", client_id, e);
                self.events.add_connection(client_id, root)
            }
        };
        let lease = self.grant(&mut state, client_id, root);
        Some((receiver, lease))
    }

    fn start_session(
        &self,
        client_id: &str,
        root: &Path,
    ) -> Result<(mpsc::Receiver<String>, Uuid), WatchError> {
        // registered before start so the watcher's initial broadcast reaches it
        let receiver = self.events.add_connection(client_id, root);
        let mut watcher =
            FileWatcher::new(root.to_path_buf(), self.config.clone(), Arc::clone(&self.events));
        if let Err(e) = watcher.start() {
            self.events.remove_connection(client_id);
            return Err(e);
        }

        let mut state = self.lock();
        state.sessions.insert(
            root.to_path_buf(),
            RootSession {
                watcher,
                subscribers: HashSet::from([client_id.to_string()]),
            },
        );
        let lease = self.grant(&mut state, client_id, root);
        Ok((receiver, lease))
    }
}

/// Stop a session's watcher outside the hub lock.
///
/// Inside a tokio runtime the processing thread is joined on the blocking
/// pool instead of the calling task.
fn retire(mut session: RootSession) {
    let Some(pending) = session.watcher.begin_stop() else {
        return;
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || pending.wait());
        }
        Err(_) => pending.wait(),
    }
}

/// Registry of live watch sessions
#[derive(Clone)]
pub struct WatchHub {
    inner: Arc<HubInner>,
}

impl WatchHub {
    pub fn new(config: WatcherConfig) -> Self {
        let events = Arc::new(EventManager::new(config.channel_capacity));
        Self {
            inner: Arc::new(HubInner {
                config,
                events,
                starting: Mutex::new(()),
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.inner.events
    }

    /// Subscribe `client_id` to changes under `root`.
    ///
    /// The returned stream starts with an `initial` snapshot of the tree.
    /// A client that is already subscribed is moved to the new root. Tree
    /// walks and watcher start-up run without the hub lock, so releases and
    /// status queries never wait on them.
    pub fn subscribe(&self, client_id: &str, root: &Path) -> Result<Subscription, WatchError> {
        let root = canonical_root(root)?;
        let inner = &self.inner;
        let _starting = inner.starting.lock().unwrap_or_else(PoisonError::into_inner);

        let (previous, running) = {
            let mut state = inner.lock();
            let previous = match inner.release(&mut state, client_id, None) {
                Release::NotHeld => None,
                Release::Released(session) => {
                    debug!("Client {} re-subscribed, previous lease released", client_id);
                    session
                }
            };
            (previous, state.sessions.contains_key(&root))
        };
        if let Some(session) = previous {
            retire(session);
        }

        let joined = if running {
            inner.join_session(client_id, &root)
        } else {
            None
        };
        let (receiver, lease) = match joined {
            Some(joined) => joined,
            None => inner.start_session(client_id, &root)?,
        };

        info!("Client {} subscribed to {}", client_id, root.display());

        Ok(Subscription {
            hub: Arc::clone(&self.inner),
            client_id: client_id.to_string(),
            root,
            lease,
            receiver,
        })
    }

    /// Release whatever subscription `client_id` holds. Safe to call repeatedly.
    pub fn unsubscribe(&self, client_id: &str) -> bool {
        let released = {
            let mut state = self.inner.lock();
            self.inner.release(&mut state, client_id, None)
        };
        match released {
            Release::NotHeld => false,
            Release::Released(session) => {
                if let Some(session) = session {
                    retire(session);
                }
                true
            }
        }
    }

    /// Re-seed the watcher for `root` from disk
    pub fn reset(&self, root: &Path) -> bool {
        let Ok(root) = canonical_root(root) else {
            return false;
        };
        let state = self.inner.lock();
        match state.sessions.get(&root) {
            Some(session) => {
                session.watcher.reset();
                true
            }
            None => false,
        }
    }

    pub fn active_roots(&self) -> Vec<PathBuf> {
        self.inner.lock().sessions.keys().cloned().collect()
    }

    pub fn subscriber_count(&self, root: &Path) -> usize {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.inner
            .lock()
            .sessions
            .get(&root)
            .map_or(0, |session| session.subscribers.len())
    }

    /// Stop every watcher and drop every connection
    pub fn shutdown(&self) {
        let retired: Vec<RootSession> = {
            let mut state = self.inner.lock();
            let clients: Vec<String> = state.clients.keys().cloned().collect();
            clients
                .iter()
                .filter_map(|client_id| match self.inner.release(&mut state, client_id, None) {
                    Release::Released(session) => session,
                    Release::NotHeld => None,
                })
                .collect()
        };
        for session in retired {
            retire(session);
        }
        debug!("Watch hub shut down");
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf, WatchError> {
    let canonical = root
        .canonicalize()
        .map_err(|_| WatchError::RootNotFound(root.to_path_buf()))?;
    if !canonical.is_dir() {
        return Err(WatchError::NotADirectory(canonical));
    }
    Ok(canonical)
}

/// A live subscription. Dropping it unsubscribes the client.
pub struct Subscription {
    hub: Arc<HubInner>,
    client_id: String,
    root: PathBuf,
    lease: Uuid,
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Canonical root this subscription watches
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next framed event, or `None` once the connection has been dropped
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let released = {
            let mut state = self.hub.lock();
            self.hub.release(&mut state, &self.client_id, Some(self.lease))
        };
        if let Release::Released(session) = released {
            debug!("Subscription for {} released", self.client_id);
            if let Some(session) = session {
                retire(session);
            }
        }
    }
}
