use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use log::{debug, trace};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Path-keyed filesystem change event, as reconciled by the controller.
#[derive(Debug, Clone)]
pub enum PathEvent {
    Added(PathBuf),
    Removed(PathBuf),
    Modified(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    FolderUpdated(PathBuf),
    Error { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub enum WatchError {
    Init(String),
    Subscribe { path: PathBuf, message: String },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Init(message) => write!(f, "failed to initialise watcher: {message}"),
            WatchError::Subscribe { path, message } => {
                write!(f, "failed to watch {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for WatchError {}

/// Bridge over the platform notifier. Directories are subscribed
/// individually (non-recursively) as the controller populates them;
/// events arrive on a channel the controller drains on its own thread.
pub struct WatchBridge {
    watcher: RecommendedWatcher,
    subscribed: BTreeSet<PathBuf>,
    pub events: Receiver<PathEvent>,
}

impl WatchBridge {
    pub fn new(config: WatchConfig) -> Result<Self, WatchError> {
        let (event_tx, event_rx) = unbounded();
        let watcher = RecommendedWatcher::new(
            move |event: Result<Event, notify::Error>| match event {
                Ok(event) => {
                    for mapped in map_event(&event) {
                        trace!("watch event {mapped:?}");
                        let _ = event_tx.send(mapped);
                    }
                }
                Err(err) => {
                    let path = err.paths.first().cloned().unwrap_or_default();
                    let _ = event_tx.send(PathEvent::Error {
                        path,
                        message: err.to_string(),
                    });
                }
            },
            Config::default()
                .with_poll_interval(config.poll_interval)
                .with_compare_contents(false),
        )
        .map_err(|err| WatchError::Init(err.to_string()))?;

        Ok(Self {
            watcher,
            subscribed: BTreeSet::new(),
            events: event_rx,
        })
    }

    pub fn subscribe(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.subscribed.contains(path) {
            return Ok(());
        }
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|err| WatchError::Subscribe {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        debug!("watch subscribed {}", path.display());
        self.subscribed.insert(path.to_path_buf());
        Ok(())
    }

    pub fn unsubscribe(&mut self, path: &Path) {
        if self.subscribed.remove(path) {
            let _ = self.watcher.unwatch(path);
            debug!("watch unsubscribed {}", path.display());
        }
    }

    /// Drop every subscription at or under `prefix` (used on re-root and
    /// on subtree eviction).
    pub fn unsubscribe_under(&mut self, prefix: &Path) {
        let stale: Vec<PathBuf> = self
            .subscribed
            .iter()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        for path in stale {
            self.unsubscribe(&path);
        }
    }

    pub fn is_subscribed(&self, path: &Path) -> bool {
        self.subscribed.contains(path)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribed.len()
    }
}

fn map_event(event: &Event) -> Vec<PathEvent> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(PathEvent::Added).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(PathEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![PathEvent::Renamed {
                from: event.paths[0].clone(),
                to: event.paths[1].clone(),
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().cloned().map(PathEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().cloned().map(PathEvent::Added).collect()
        }
        EventKind::Modify(_) => event
            .paths
            .iter()
            .cloned()
            .map(PathEvent::Modified)
            .collect(),
        EventKind::Access(_) => Vec::new(),
        EventKind::Other | EventKind::Any => event
            .paths
            .iter()
            .cloned()
            .map(PathEvent::FolderUpdated)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RenameMode};

    #[test]
    fn create_maps_to_added() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/r/new.txt"));
        let mapped = map_event(&event);
        assert!(matches!(mapped.as_slice(), [PathEvent::Added(path)] if path == Path::new("/r/new.txt")));
    }

    #[test]
    fn paired_rename_maps_to_renamed() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/r/old"))
            .add_path(PathBuf::from("/r/new"));
        let mapped = map_event(&event);
        match mapped.as_slice() {
            [PathEvent::Renamed { from, to }] => {
                assert_eq!(from, Path::new("/r/old"));
                assert_eq!(to, Path::new("/r/new"));
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn unpaired_rename_halves_map_to_remove_and_add() {
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/r/old"));
        assert!(matches!(map_event(&from).as_slice(), [PathEvent::Removed(_)]));

        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/r/new"));
        assert!(matches!(map_event(&to).as_slice(), [PathEvent::Added(_)]));
    }

    #[test]
    fn access_events_are_dropped() {
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(PathBuf::from("/r/file"));
        assert!(map_event(&event).is_empty());
    }
}
