use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, trace};

use crate::arena::ItemId;
use crate::backend::{Backend, BackendError, CancelToken, ChildSnapshot, Enumeration};
use crate::item::{IconHandle, TreeItem};

pub enum FetchCommand {
    Children {
        job_id: u64,
        target: ItemId,
        path: PathBuf,
    },
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(Vec<ChildSnapshot>),
    Aborted,
    Failed { code: i32, message: String },
}

#[derive(Debug)]
pub struct FetchMessage {
    pub job_id: u64,
    pub target: ItemId,
    pub outcome: FetchOutcome,
}

/// Handle to one retrieval engine: a single serialized worker thread that
/// populates children out-of-band, one request in flight at a time.
///
/// Requesting a new fetch bumps the shared job counter, which the running
/// enumeration observes through its cancel token at its next per-entry
/// check. The worker only picks up the new command after the old call
/// returned, so a superseded fetch always resolves (as `Aborted`) before
/// the next one starts enumerating.
pub struct EngineHandle {
    cmd_tx: Sender<FetchCommand>,
    job_counter: Arc<AtomicU64>,
    backend: Arc<dyn Backend>,
}

pub fn spawn(backend: Arc<dyn Backend>) -> (EngineHandle, Receiver<FetchMessage>) {
    let (cmd_tx, cmd_rx) = unbounded();
    let (msg_tx, msg_rx) = unbounded();
    let job_counter = Arc::new(AtomicU64::new(0));
    let worker_counter = job_counter.clone();
    let worker_backend = backend.clone();

    thread::Builder::new()
        .name("tree-cache-engine".into())
        .spawn(move || worker_loop(cmd_rx, msg_tx, worker_counter, worker_backend))
        .expect("failed to spawn engine thread");

    (
        EngineHandle {
            cmd_tx,
            job_counter,
            backend,
        },
        msg_rx,
    )
}

impl EngineHandle {
    /// Queue an asynchronous children fetch, superseding any fetch that is
    /// still running. Returns the job id the completion will carry.
    pub fn request_children(&self, target: ItemId, path: PathBuf) -> u64 {
        let job_id = self.job_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.cmd_tx.send(FetchCommand::Children {
            job_id,
            target,
            path,
        });
        job_id
    }

    /// Synchronous fill of an item's own attributes. A failure is left to
    /// the caller to record on the node; no children fetch is enqueued.
    pub fn populate_self(&self, item: &mut TreeItem) -> Result<(), BackendError> {
        self.backend.populate_self(item)
    }

    pub fn get_icon(&self, item: &TreeItem) -> Option<IconHandle> {
        self.backend.get_icon(item)
    }

    /// Re-read one item's attributes in place. Callers must not invoke
    /// this on a locked node.
    pub fn refresh(&self, item: &mut TreeItem) -> Result<(), BackendError> {
        self.backend.refresh(item)
    }

    pub fn will_recycle(&self, item: &TreeItem) -> bool {
        self.backend.will_recycle(item)
    }

    pub fn set_display_name_of(
        &self,
        item: &TreeItem,
        name: &str,
    ) -> Result<PathBuf, BackendError> {
        self.backend.set_display_name_of(item, name)
    }
}

fn worker_loop(
    cmd_rx: Receiver<FetchCommand>,
    msg_tx: Sender<FetchMessage>,
    job_counter: Arc<AtomicU64>,
    backend: Arc<dyn Backend>,
) {
    while let Ok(command) = cmd_rx.recv() {
        match command {
            FetchCommand::Children {
                job_id,
                target,
                path,
            } => {
                // Superseded while still queued: resolve without touching
                // the filesystem.
                if job_counter.load(Ordering::SeqCst) != job_id {
                    trace!("fetch job {job_id} superseded before start");
                    let _ = msg_tx.send(FetchMessage {
                        job_id,
                        target,
                        outcome: FetchOutcome::Aborted,
                    });
                    continue;
                }

                let token = CancelToken::new(job_counter.clone(), job_id);
                let outcome = match backend.enumerate_children(&path, &token) {
                    Ok(Enumeration::Complete(children)) => {
                        trace!(
                            "fetch job {job_id} complete: {} children under {}",
                            children.len(),
                            path.display()
                        );
                        FetchOutcome::Fetched(children)
                    }
                    Ok(Enumeration::Cancelled) => {
                        debug!("fetch job {job_id} aborted under {}", path.display());
                        FetchOutcome::Aborted
                    }
                    Err(err) => {
                        debug!("fetch job {job_id} failed under {}: {err}", path.display());
                        FetchOutcome::Failed {
                            code: err.code,
                            message: err.message,
                        }
                    }
                };

                let _ = msg_tx.send(FetchMessage {
                    job_id,
                    target,
                    outcome,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use crate::arena::TreeArena;
    use crate::item::MediaKind;

    /// Backend whose enumeration yields canned entries slowly, checking
    /// the token between entries like a real directory walk.
    struct SlowBackend {
        per_entry: Duration,
        entries: usize,
    }

    impl Backend for SlowBackend {
        fn populate_self(&self, _item: &mut TreeItem) -> Result<(), BackendError> {
            Ok(())
        }

        fn enumerate_children(
            &self,
            path: &Path,
            token: &CancelToken,
        ) -> Result<Enumeration, BackendError> {
            let mut children = Vec::new();
            for index in 0..self.entries {
                if token.is_cancelled() {
                    return Ok(Enumeration::Cancelled);
                }
                thread::sleep(self.per_entry);
                children.push(ChildSnapshot {
                    path: path.join(format!("entry{index}")),
                    is_folder: false,
                    is_hidden: false,
                    size: 1,
                    type_label: "File".to_string(),
                    created: None,
                    accessed: None,
                    modified: None,
                    has_subfolders: false,
                    media: MediaKind::Unknown,
                });
            }
            Ok(Enumeration::Complete(children))
        }

        fn get_icon(&self, _item: &TreeItem) -> Option<IconHandle> {
            None
        }

        fn refresh(&self, _item: &mut TreeItem) -> Result<(), BackendError> {
            Ok(())
        }

        fn will_recycle(&self, _item: &TreeItem) -> bool {
            false
        }

        fn set_display_name_of(
            &self,
            _item: &TreeItem,
            _name: &str,
        ) -> Result<PathBuf, BackendError> {
            Err(BackendError {
                code: -1,
                message: "unsupported".to_string(),
            })
        }
    }

    fn test_targets() -> (ItemId, ItemId) {
        let mut arena = TreeArena::new();
        let a = arena.insert_detached(TreeItem::new(PathBuf::from("/a"), true));
        let b = arena.insert_detached(TreeItem::new(PathBuf::from("/b"), true));
        (a, b)
    }

    #[test]
    fn second_request_aborts_the_first_before_completing() {
        let backend = Arc::new(SlowBackend {
            per_entry: Duration::from_millis(25),
            entries: 40,
        });
        let (engine, rx) = spawn(backend);
        let (target_a, target_b) = test_targets();

        let job_a = engine.request_children(target_a, PathBuf::from("/a"));
        thread::sleep(Duration::from_millis(60));
        let job_b = engine.request_children(target_b, PathBuf::from("/b"));

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("first");
        assert_eq!(first.job_id, job_a);
        assert_eq!(first.target, target_a);
        assert!(
            matches!(first.outcome, FetchOutcome::Aborted),
            "superseded fetch must abort, got {:?}",
            first.outcome
        );

        let second = rx.recv_timeout(Duration::from_secs(5)).expect("second");
        assert_eq!(second.job_id, job_b);
        assert_eq!(second.target, target_b);
        match second.outcome {
            FetchOutcome::Fetched(children) => assert_eq!(children.len(), 40),
            other => panic!("expected fetched outcome, got {other:?}"),
        }
    }

    #[test]
    fn uncontested_fetch_completes() {
        let backend = Arc::new(SlowBackend {
            per_entry: Duration::from_millis(1),
            entries: 3,
        });
        let (engine, rx) = spawn(backend);
        let (target, _) = test_targets();

        let job_id = engine.request_children(target, PathBuf::from("/a"));
        let message = rx.recv_timeout(Duration::from_secs(5)).expect("message");
        assert_eq!(message.job_id, job_id);
        assert!(matches!(message.outcome, FetchOutcome::Fetched(_)));
    }
}
