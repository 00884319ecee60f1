//! Filesystem watcher driving the diff pipeline
//!
//! One `FileWatcher` observes one root. OS notifications arrive on notify's
//! own thread and are forwarded to a dedicated processing thread, which owns
//! the diff generator. Generation and enqueueing both happen on that thread,
//! so every connection receives events in the order they were produced.

pub mod debouncer;
pub mod filter;

use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::diff::{probe, DiffGenerator, FileEvent, FileEventKind};
use crate::events::EventManager;
use crate::metrics;
use crate::paths::relative_string;
use crate::snapshot::SnapshotBuilder;

pub use debouncer::Debouncer;
pub use filter::PathFilter;

/// Errors that prevent a watch session from starting
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Watch root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to watch directory: {0}")]
    Notify(#[from] notify::Error),

    #[error("Failed to start watcher thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Lower bound on the processing loop's wake-up interval
const MIN_TICK: Duration = Duration::from_millis(10);

enum Message {
    Fs(notify::Result<notify::Event>),
    Reset,
    Shutdown,
}

struct Running {
    watcher: RecommendedWatcher,
    control: mpsc::Sender<Message>,
    stopping: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// A stopped watcher whose processing thread may still be winding down.
///
/// The thread broadcasts nothing new once the stop was requested; it can
/// only finish the single event it was handling at that moment.
#[must_use = "dropping a PendingStop detaches the processing thread"]
pub struct PendingStop {
    root: PathBuf,
    thread: JoinHandle<()>,
}

impl PendingStop {
    /// Block until the processing thread has exited
    pub fn wait(self) {
        if self.thread.join().is_err() {
            error!("Watcher thread for {} panicked", self.root.display());
        }
        debug!("Processing thread for {} joined", self.root.display());
    }
}

/// Watches one directory tree and broadcasts its diffs
pub struct FileWatcher {
    root: PathBuf,
    config: WatcherConfig,
    filter: PathFilter,
    events: Arc<EventManager>,
    running: Option<Running>,
}

impl FileWatcher {
    pub fn new(root: PathBuf, config: WatcherConfig, events: Arc<EventManager>) -> Self {
        let filter = PathFilter::new(&config.ignore_patterns);
        Self {
            root,
            config,
            filter,
            events,
            running: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start watching.
    ///
    /// Seeds the diff generator from a snapshot walk, sends an `initial`
    /// snapshot to every connection on this root, then begins processing
    /// notifications. Starting a running watcher is a no-op.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.running.is_some() {
            info!("Watcher for {} is already running", self.root.display());
            return Ok(());
        }

        if !self.root.exists() {
            return Err(WatchError::RootNotFound(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(WatchError::NotADirectory(self.root.clone()));
        }

        let (tx, rx) = mpsc::channel();

        // watch first so changes made during the seeding walk are queued, not lost
        let fs_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = fs_tx.send(Message::Fs(res));
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let snapshot = SnapshotBuilder::new(self.root.clone(), self.filter.clone());
        let mut generator = DiffGenerator::new(self.root.clone());
        generator.seed(snapshot.entries());

        match snapshot.tree() {
            Ok(tree) => {
                self.events.broadcast_initial(&self.root, tree);
            }
            Err(e) => warn!("Failed to build initial snapshot: {:#}", e),
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let processor = EventProcessor {
            root: self.root.clone(),
            filter: self.filter.clone(),
            debouncer: Debouncer::new(self.config.debounce_window()),
            generator,
            snapshot,
            events: Arc::clone(&self.events),
            stopping: Arc::clone(&stopping),
            pending_renames: HashMap::new(),
            paired_renames: HashSet::new(),
        };

        let thread = thread::Builder::new()
            .name("filecast-watch".to_string())
            .spawn(move || processor.run(rx))?;

        info!("Watching directory: {:?}", self.root);
        info!("Debounce window: {}ms", self.config.debounce_ms);
        metrics::ACTIVE_WATCHERS.inc();

        self.running = Some(Running {
            watcher,
            control: tx,
            stopping,
            thread,
        });
        Ok(())
    }

    /// Stop watching without waiting for the processing thread.
    ///
    /// Returns `None` when the watcher was not running.
    pub fn begin_stop(&mut self) -> Option<PendingStop> {
        let Some(running) = self.running.take() else {
            debug!("Watcher for {} is not running", self.root.display());
            return None;
        };

        // no new OS notifications past this point
        drop(running.watcher);
        running.stopping.store(true, Ordering::Release);
        let _ = running.control.send(Message::Shutdown);

        metrics::ACTIVE_WATCHERS.dec();
        info!("Stopped watching {:?}", self.root);

        Some(PendingStop {
            root: self.root.clone(),
            thread: running.thread,
        })
    }

    /// Stop watching.
    ///
    /// Returns only after the processing thread has exited, so no event is
    /// broadcast once this returns. Stopping a stopped watcher is a no-op.
    pub fn stop(&mut self) {
        if let Some(pending) = self.begin_stop() {
            pending.wait();
        }
    }

    /// Discard the diff state and re-seed it from a fresh snapshot walk
    pub fn reset(&self) {
        if let Some(running) = &self.running {
            info!("Resetting watcher state for {}", self.root.display());
            let _ = running.control.send(Message::Reset);
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug)]
struct PendingRename {
    from: PathBuf,
    since: Instant,
}

/// State owned by the processing thread
struct EventProcessor {
    root: PathBuf,
    filter: PathFilter,
    debouncer: Debouncer,
    generator: DiffGenerator,
    snapshot: SnapshotBuilder,
    events: Arc<EventManager>,
    stopping: Arc<AtomicBool>,
    /// `From` halves of renames awaiting their `To`, keyed by notify tracker
    pending_renames: HashMap<Option<usize>, PendingRename>,
    /// Trackers whose move was already emitted from the `To` half
    paired_renames: HashSet<usize>,
}

impl EventProcessor {
    fn run(mut self, rx: mpsc::Receiver<Message>) {
        let tick = (self.debouncer.window() / 2).max(MIN_TICK);

        loop {
            let message = rx.recv_timeout(tick);
            if self.stopping.load(Ordering::Acquire) {
                break;
            }

            // windows that closed before this message arrived settle first
            self.flush_due(Instant::now());

            match message {
                Ok(Message::Fs(Ok(event))) => self.handle_notify(event),
                Ok(Message::Fs(Err(e))) => error!("Watch error: {}", e),
                Ok(Message::Reset) => {
                    self.generator.reset();
                    self.debouncer.clear();
                    self.pending_renames.clear();
                    self.paired_renames.clear();
                    self.generator.seed(self.snapshot.entries());
                }
                Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.flush_stale_renames();
        }

        if !self.debouncer.is_empty() {
            debug!(
                "Discarding {} pending changes for {}",
                self.debouncer.len(),
                self.root.display()
            );
        }
        debug!("Processing thread for {} exiting", self.root.display());
    }

    fn handle_notify(&mut self, event: notify::Event) {
        let tracker = event.attrs.tracker();

        match event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {}
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.emit(FileEventKind::Created, path);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.emit(FileEventKind::Deleted, path);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.handle_rename(mode, tracker, &event.paths),
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.emit(FileEventKind::Modified, path);
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
    }

    fn handle_rename(&mut self, mode: RenameMode, tracker: Option<usize>, paths: &[PathBuf]) {
        match mode {
            RenameMode::From => {
                if let Some(from) = paths.first() {
                    self.pending_renames.insert(
                        tracker,
                        PendingRename {
                            from: from.clone(),
                            since: Instant::now(),
                        },
                    );
                }
            }
            RenameMode::To => {
                let Some(to) = paths.first() else {
                    return;
                };
                match self.pending_renames.remove(&tracker) {
                    Some(pending) => {
                        if let Some(id) = tracker {
                            self.paired_renames.insert(id);
                        }
                        self.emit_move(&pending.from, to);
                    }
                    None => self.emit(FileEventKind::Created, to),
                }
            }
            RenameMode::Both => {
                if let Some(id) = tracker {
                    if self.paired_renames.remove(&id) {
                        return;
                    }
                }
                self.pending_renames.remove(&tracker);
                if let [from, to] = paths {
                    self.emit_move(from, to);
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in paths {
                    let kind = if path.exists() {
                        FileEventKind::Created
                    } else {
                        FileEventKind::Deleted
                    };
                    self.emit(kind, path);
                }
            }
        }
    }

    /// A `From` with no matching `To` left the tree
    fn flush_stale_renames(&mut self) {
        if self.pending_renames.is_empty() {
            return;
        }

        let window = self.debouncer.window();
        let stale: Vec<_> = self
            .pending_renames
            .iter()
            .filter(|(_, p)| p.since.elapsed() >= window)
            .map(|(k, _)| *k)
            .collect();

        for key in stale {
            if let Some(pending) = self.pending_renames.remove(&key) {
                self.emit(FileEventKind::Deleted, &pending.from);
            }
        }
    }

    /// Settle every path whose debounce window has closed by `now`
    fn flush_due(&mut self, now: Instant) {
        for (rel, path) in self.debouncer.due(now) {
            self.settle(rel, &path);
        }
    }

    /// Read a path's state at the end of its window and report the difference.
    ///
    /// The notification kinds folded into the window are not consulted: a
    /// file present on disk is created or modified depending on whether it
    /// is already tracked, and a missing one is deleted.
    fn settle(&mut self, rel: String, path: &Path) {
        let event = match probe(path) {
            Ok(_) if path.is_dir() => return,
            Ok(metadata) if self.generator.contains(&rel) => {
                FileEvent::modified(rel, Some(metadata))
            }
            Ok(metadata) => FileEvent::created(rel, Some(metadata)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => FileEvent::deleted(rel),
            Err(e) => {
                warn!("Dropping change for {}: {}", rel, e);
                metrics::PROBE_FAILURES.inc();
                return;
            }
        };
        self.dispatch(event);
    }

    /// Moves across the exclusion boundary become a create or a delete
    fn emit_move(&mut self, from: &Path, to: &Path) {
        let from_rel = self.visible(from);
        let to_rel = self.visible(to);

        match (from_rel, to_rel) {
            (Some(old_rel), Some(new_rel)) => {
                if to.is_dir() {
                    for child in self.tracked_under(&old_rel) {
                        let moved_to = format!("{}{}", new_rel, &child[old_rel.len()..]);
                        self.dispatch(FileEvent::moved(child, moved_to));
                    }
                    // changes still settling follow the directory
                    for child in self.debouncer.take_under(&old_rel) {
                        let moved_to = format!("{}{}", new_rel, &child[old_rel.len()..]);
                        let path = self.root.join(&moved_to);
                        self.observe(&moved_to, &path);
                    }
                    return;
                }

                let carried = self.debouncer.take(&old_rel).is_some();
                if self.generator.contains(&old_rel) {
                    self.dispatch(FileEvent::moved(old_rel, new_rel.clone()));
                    if carried {
                        self.observe(&new_rel, to);
                    }
                } else {
                    self.observe(&new_rel, to);
                }
            }
            (None, Some(_)) => self.emit(FileEventKind::Created, to),
            (Some(_), None) => self.emit(FileEventKind::Deleted, from),
            (None, None) => {}
        }
    }

    fn emit(&mut self, kind: FileEventKind, path: &Path) {
        let Some(rel) = self.visible(path) else {
            return;
        };

        // directories are inferred from the files below them
        if kind != FileEventKind::Deleted && path.is_dir() {
            if kind == FileEventKind::Created {
                self.announce_directory(path);
            }
            return;
        }

        if kind == FileEventKind::Deleted
            && !self.generator.contains(&rel)
            && !self.debouncer.is_pending(&rel)
        {
            for child in self.tracked_under(&rel) {
                self.dispatch(FileEvent::deleted(child));
            }
            return;
        }

        self.observe(&rel, path);
    }

    /// A directory that arrived whole, e.g. moved in from outside the root
    fn announce_directory(&mut self, dir: &Path) {
        for (rel, metadata) in self.snapshot.entries_under(dir) {
            self.dispatch(FileEvent::created(rel, Some(metadata)));
        }
    }

    /// Tracked files strictly below the directory `rel`
    fn tracked_under(&self, rel: &str) -> Vec<String> {
        let prefix = format!("{}/", rel);
        let mut paths: Vec<String> = self
            .generator
            .tracked_paths()
            .filter(|p| p.starts_with(&prefix))
            .map(str::to_string)
            .collect();
        paths.sort();
        paths
    }

    /// Tree-relative path of `path`, or `None` when outside the root or excluded
    fn visible(&self, path: &Path) -> Option<String> {
        let rel = relative_string(&self.root, path)?;
        if self.filter.is_excluded(Path::new(&rel)) {
            debug!("Skipping excluded path: {}", rel);
            return None;
        }
        Some(rel)
    }

    fn observe(&mut self, rel: &str, path: &Path) {
        if self.debouncer.observe(rel, path, Instant::now()) {
            debug!("Debounced event for {}", rel);
            metrics::EVENTS_DEBOUNCED.inc();
        }
    }

    fn dispatch(&mut self, event: FileEvent) {
        debug!("File event: {} {}", event.kind, event.path);

        let Some(diff) = self.generator.process_event(&event) else {
            return;
        };
        self.events.send_tree_diff(&self.root, diff);

        if !event.needs_content() {
            return;
        }

        match self.generator.generate_content_diff(&event.path) {
            Ok(Some(content)) => {
                self.events.send_content_diff(&self.root, content);
            }
            Ok(None) => debug!("Content of {} unchanged", event.path),
            Err(e) => warn!("Failed to read content of {}: {}", event.path, e),
        }
    }
}
