use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, trace, warn};

use crate::arena::{ItemId, TreeArena};
use crate::backend::Backend;
use crate::collate::{SortSpec, compare_items};
use crate::config::ModelConfig;
use crate::engine::{self, EngineHandle, FetchMessage, FetchOutcome};
use crate::gc::{GcTimer, RefLedger};
use crate::item::{IconState, PopulateState, TreeItem};
use crate::watch::{PathEvent, WatchBridge};

pub const TAG_DISPLAY: u32 = 1 << 0;
pub const TAG_ICON: u32 = 1 << 1;
pub const TAG_FETCHED: u32 = 1 << 2;
pub const TAG_ERROR: u32 = 1 << 3;
pub const TAG_START_RENAME: u32 = 1 << 4;

/// Typed change notification pushed to observers. Handles, not
/// references: a stale `ItemId` simply stops resolving, so observers can
/// lag behind structural changes safely.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    ResetBegan,
    ResetEnded { root: ItemId },
    RowsInserted { parent: ItemId, first: usize, last: usize },
    RowsRemoved { parent: ItemId, first: usize, last: usize },
    CellChanged { item: ItemId, row: usize, tags: u32 },
    ItemErrored { item: ItemId, code: i32, message: String },
}

/// The tree cache controller: sole mutator of tree structure.
///
/// Reconciles three event sources — engine completions, watcher events,
/// and caller requests — into one consistent tree, on the caller's thread
/// (everything asynchronous funnels through `process_events`). A second
/// pane gets its own model with its own engine; instances share nothing.
pub struct TreeModel {
    arena: TreeArena,
    engine: EngineHandle,
    engine_rx: Receiver<FetchMessage>,
    watch: Option<WatchBridge>,
    ledger: Arc<RefLedger>,
    gc_timer: GcTimer,
    sort: SortSpec,
    root: Option<ItemId>,
    observers: Vec<Sender<ModelEvent>>,
}

impl TreeModel {
    pub fn new(backend: Arc<dyn Backend>, config: ModelConfig) -> Self {
        let (engine, engine_rx) = engine::spawn(backend);
        let watch = if config.enable_watcher {
            match WatchBridge::new(config.watch_config()) {
                Ok(bridge) => Some(bridge),
                Err(err) => {
                    warn!("watcher unavailable, running without change events: {err}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            arena: TreeArena::new(),
            engine,
            engine_rx,
            watch,
            ledger: Arc::new(RefLedger::new()),
            gc_timer: GcTimer::new(config.gc_config().sweep_interval),
            sort: config.sort,
            root: None,
            observers: Vec::new(),
        }
    }

    /// Subscribe an observer; events accumulate in the returned channel
    /// until drained.
    pub fn subscribe(&mut self) -> Receiver<ModelEvent> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    pub fn root(&self) -> Option<ItemId> {
        self.root
    }

    pub fn item(&self, id: ItemId) -> Option<&TreeItem> {
        self.arena.get(id)
    }

    pub fn children(&self, id: ItemId) -> &[ItemId] {
        self.arena.children(id)
    }

    pub fn child_count(&self, id: ItemId) -> usize {
        self.arena.child_count(id)
    }

    pub fn row_of(&self, id: ItemId) -> Option<usize> {
        self.arena.row_of(id)
    }

    pub fn parent_of(&self, id: ItemId) -> Option<ItemId> {
        self.arena.parent(id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<ItemId> {
        self.arena.resolve_path(self.root?, path)
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.sort
    }

    /// Whether the watcher currently holds a subscription for `path`.
    /// Always false when the model runs without a watcher.
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watch
            .as_ref()
            .map(|bridge| bridge.is_subscribed(path))
            .unwrap_or(false)
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Replace the root subtree. Never fatal: a population failure leaves
    /// the new root in `Error` state with its fields set.
    ///
    /// The old subtree is freed only after the swap has been announced;
    /// observers holding handles into it see them go stale rather than
    /// dangle.
    pub fn set_root(&mut self, path: PathBuf) -> ItemId {
        self.emit(ModelEvent::ResetBegan);

        let old_root = self.root.take();
        if let (Some(bridge), Some(old_id)) = (self.watch.as_mut(), old_root) {
            if let Some(old_item) = self.arena.get(old_id) {
                bridge.unsubscribe_under(&old_item.path);
            }
        }

        let mut item = TreeItem::new(path, true);
        let populate_error = self.engine.populate_self(&mut item).err();
        if let Some(err) = &populate_error {
            item.set_error(err.code, err.message.clone());
        } else {
            item.icon = self.engine.get_icon(&item);
            item.icon_state = IconState::Final;
        }
        let is_folder = item.is_folder;

        let root_id = self.arena.insert_detached(item);
        self.root = Some(root_id);
        self.emit(ModelEvent::ResetEnded { root: root_id });

        if let Some(err) = populate_error {
            debug!("root population failed: {err}");
            self.emit(ModelEvent::ItemErrored {
                item: root_id,
                code: err.code,
                message: err.message,
            });
        } else if is_folder {
            self.fetch_children(root_id);
        }

        if let Some(old_id) = old_root {
            for freed in self.arena.free_subtree(old_id) {
                self.ledger.purge(freed);
            }
        }

        root_id
    }

    /// Start a background children fetch. No-op when the node is locked,
    /// already fully fetched, or not a folder.
    pub fn fetch_children(&mut self, id: ItemId) {
        let Some(item) = self.arena.get(id) else {
            return;
        };
        if item.state.is_locked() || item.state.all_children_fetched() || !item.is_folder {
            trace!("fetch_children no-op for {}", item.path.display());
            return;
        }
        let path = item.path.clone();

        if let Some(item) = self.arena.get_mut(id) {
            item.clear_error();
            item.state = PopulateState::Fetching;
        }
        self.emit_cell_changed(id, TAG_FETCHED);

        let job_id = self.engine.request_children(id, path);
        trace!("fetch job {job_id} queued for item {id:?}");
    }

    /// Explicit refresh: drop all children (with notification) and
    /// re-enter the fetch cycle. Ignored while a fetch is in flight.
    pub fn refresh(&mut self, id: ItemId) {
        let Some(item) = self.arena.get(id) else {
            return;
        };
        if item.state.is_locked() {
            return;
        }
        self.remove_all_children(id);
        if let Some(item) = self.arena.get_mut(id) {
            item.state = PopulateState::Unfetched;
        }
        self.fetch_children(id);
    }

    /// View-side retain: a view holding any descendant keeps the whole
    /// ancestor chain in use.
    pub fn increase_ref(&self, id: ItemId) {
        let chain = self.arena.ancestor_chain(id);
        self.ledger.bump_chain(&chain);
    }

    pub fn decrease_ref(&self, id: ItemId) {
        let chain = self.arena.ancestor_chain(id);
        self.ledger.drop_chain(&chain);
    }

    pub fn ref_count(&self, id: ItemId) -> u64 {
        self.ledger.count(id)
    }

    /// Ask observers to open an inline rename editor on this item.
    pub fn begin_rename(&mut self, id: ItemId) {
        if self.arena.contains(id) {
            self.emit_cell_changed(id, TAG_START_RENAME);
        }
    }

    /// Rename through the backend, then reconcile the tree immediately
    /// rather than waiting for the watcher echo.
    pub fn rename_item(&mut self, id: ItemId, name: &str) -> bool {
        let Some(item) = self.arena.get(id) else {
            return false;
        };
        let old_path = item.path.clone();
        let new_path = match self.engine.set_display_name_of(item, name) {
            Ok(path) => path,
            Err(err) => {
                let code = err.code;
                let message = err.message;
                if let Some(item) = self.arena.get_mut(id) {
                    item.error = Some(crate::item::ItemError {
                        code,
                        message: message.clone(),
                    });
                }
                self.emit(ModelEvent::ItemErrored {
                    item: id,
                    code,
                    message,
                });
                self.emit_cell_changed(id, TAG_ERROR);
                return false;
            }
        };
        self.apply_rename(id, &old_path, new_path);
        true
    }

    /// Drain engine completions and watcher events, then run the GC gate.
    /// Must be called on the thread that owns the model.
    pub fn process_events(&mut self) {
        while let Ok(message) = self.engine_rx.try_recv() {
            self.handle_fetch_message(message);
        }

        let mut buffered = Vec::new();
        if let Some(bridge) = self.watch.as_ref() {
            while let Ok(event) = bridge.events.try_recv() {
                buffered.push(event);
            }
        }
        for event in buffered {
            self.apply_path_event(event);
        }

        self.maybe_sweep(Instant::now());
    }

    fn handle_fetch_message(&mut self, message: FetchMessage) {
        let FetchMessage {
            job_id,
            target,
            outcome,
        } = message;

        let Some(item) = self.arena.get(target) else {
            trace!("fetch job {job_id} resolved for a freed item, dropping");
            return;
        };
        if !item.state.is_locked() {
            trace!("fetch job {job_id} resolved for an unlocked item, dropping");
            return;
        }
        let path = item.path.clone();

        match outcome {
            FetchOutcome::Fetched(snapshots) => {
                let mut children: Vec<TreeItem> =
                    snapshots.into_iter().map(|snap| snap.into_item()).collect();
                children.sort_by(|a, b| compare_items(a, b, self.sort));
                let count = children.len();

                for mut child in children {
                    child.icon = self.engine.get_icon(&child);
                    let child_id = self.arena.insert_detached(child);
                    let row = self.arena.child_count(target);
                    if !self.arena.attach_child(target, child_id, row) {
                        warn!("dropping child with colliding path under {}", path.display());
                        self.arena.free_subtree(child_id);
                    }
                }

                let attached = self.arena.child_count(target);
                let any_folders = self
                    .arena
                    .children(target)
                    .iter()
                    .any(|child| self.arena.get(*child).map(|c| c.is_folder).unwrap_or(false));
                if let Some(item) = self.arena.get_mut(target) {
                    item.state = PopulateState::Fetched;
                    item.has_subfolders = any_folders;
                }
                debug!("fetched {attached} of {count} children under {}", path.display());

                if attached > 0 {
                    self.emit(ModelEvent::RowsInserted {
                        parent: target,
                        first: 0,
                        last: attached - 1,
                    });
                }
                self.emit_cell_changed(target, TAG_FETCHED);
                self.subscribe_watch(&path);
            }
            FetchOutcome::Aborted => {
                // Silent: the superseding caller's own fetch notifies.
                self.remove_all_children_silently(target);
                if let Some(item) = self.arena.get_mut(target) {
                    item.state = PopulateState::Aborted;
                }
            }
            FetchOutcome::Failed { code, message } => {
                if let Some(item) = self.arena.get_mut(target) {
                    item.set_error(code, message.clone());
                }
                self.emit(ModelEvent::ItemErrored {
                    item: target,
                    code,
                    message,
                });
                self.emit_cell_changed(target, TAG_ERROR);
            }
        }
    }

    /// Reconcile one watcher event against the live tree.
    pub fn apply_path_event(&mut self, event: PathEvent) {
        match event {
            PathEvent::Added(path) => self.handle_added(path),
            PathEvent::Removed(path) => self.handle_removed(&path),
            PathEvent::Modified(path) => self.handle_modified(&path),
            PathEvent::Renamed { from, to } => self.handle_renamed(&from, to),
            PathEvent::FolderUpdated(path) => self.handle_folder_updated(&path),
            PathEvent::Error { path, message } => {
                warn!("watch error at {}: {message}", path.display());
            }
        }
    }

    fn handle_added(&mut self, path: PathBuf) {
        let Some(parent_path) = path.parent().map(Path::to_path_buf) else {
            return;
        };
        let Some(parent) = self.find_by_path(&parent_path) else {
            trace!("add for unknown parent {}, dropping", parent_path.display());
            return;
        };
        let Some(parent_item) = self.arena.get(parent) else {
            return;
        };
        if parent_item.state.is_locked() {
            return;
        }
        if self.arena.child_by_path(parent, &path).is_some() {
            return;
        }

        let mut item = TreeItem::new(path.clone(), false);
        if let Err(err) = self.engine.populate_self(&mut item) {
            debug!("added path vanished before populate: {} ({err})", path.display());
            return;
        }
        item.icon = self.engine.get_icon(&item);

        let row = self.sorted_row(parent, &item);
        let child = self.arena.insert_detached(item);
        if !self.arena.attach_child(parent, child, row) {
            self.arena.free_subtree(child);
            return;
        }
        self.emit(ModelEvent::RowsInserted {
            parent,
            first: row,
            last: row,
        });
    }

    fn handle_removed(&mut self, path: &Path) {
        let Some(id) = self.find_by_path(path) else {
            return;
        };
        let Some(parent) = self.arena.parent(id) else {
            // Root removal: surface as an error, keep the tree valid.
            if let Some(item) = self.arena.get_mut(id) {
                item.set_error(-1, "root path removed".to_string());
            }
            self.emit(ModelEvent::ItemErrored {
                item: id,
                code: -1,
                message: "root path removed".to_string(),
            });
            return;
        };
        if self
            .arena
            .get(parent)
            .map(|item| item.state.is_locked())
            .unwrap_or(false)
        {
            return;
        }

        let is_folder = self.arena.get(id).map(|item| item.is_folder).unwrap_or(false);
        if let Some(row) = self.arena.row_of(id) {
            self.emit(ModelEvent::RowsRemoved {
                parent,
                first: row,
                last: row,
            });
        }
        if is_folder {
            if let Some(bridge) = self.watch.as_mut() {
                bridge.unsubscribe_under(path);
            }
        }
        for freed in self.arena.free_subtree(id) {
            self.ledger.purge(freed);
        }
    }

    fn handle_modified(&mut self, path: &Path) {
        let Some(id) = self.find_by_path(path) else {
            return;
        };
        let Some(item) = self.arena.get(id) else {
            return;
        };
        if item.state.is_locked() {
            return;
        }
        let mut scratch = item.clone();
        match self.engine.refresh(&mut scratch) {
            Ok(()) => {
                if let Some(item) = self.arena.get_mut(id) {
                    *item = scratch;
                }
                self.emit_cell_changed(id, TAG_DISPLAY);
            }
            Err(err) => {
                if let Some(item) = self.arena.get_mut(id) {
                    item.set_error(err.code, err.message.clone());
                }
                self.emit(ModelEvent::ItemErrored {
                    item: id,
                    code: err.code,
                    message: err.message,
                });
                self.emit_cell_changed(id, TAG_ERROR);
            }
        }
    }

    fn handle_renamed(&mut self, from: &Path, to: PathBuf) {
        if from == to {
            return;
        }
        let Some(id) = self.find_by_path(from) else {
            // Missed the add for the old path; treat the new one as fresh.
            self.handle_added(to);
            return;
        };
        self.apply_rename(id, from, to);
    }

    fn apply_rename(&mut self, id: ItemId, from: &Path, to: PathBuf) {
        let Some(parent) = self.arena.parent(id) else {
            // Renaming the root only rewrites paths; no row to reposition.
            if self.arena.rename_node(id, to) {
                self.refresh_renamed(id);
                self.resubscribe_renamed(id, from);
                self.emit_cell_changed(id, TAG_DISPLAY | TAG_ICON);
            }
            return;
        };
        if self
            .arena
            .get(parent)
            .map(|item| item.state.is_locked())
            .unwrap_or(false)
        {
            return;
        }

        if !self.arena.rename_node(id, to) {
            warn!("rename collision under {}, dropping event", from.display());
            return;
        }
        self.refresh_renamed(id);
        self.resubscribe_renamed(id, from);

        // Reposition in sorted order; the map key moved with the rename.
        self.arena.detach_child(parent, id);
        let row = self
            .arena
            .get(id)
            .map(|item| self.sorted_row(parent, item))
            .unwrap_or(0);
        self.arena.attach_child(parent, id, row);
        self.emit_cell_changed(id, TAG_DISPLAY | TAG_ICON);
    }

    /// Re-read attributes under the new path; the new name can move the
    /// item to a different type category, so the label and icon must be
    /// re-derived, not just the display name.
    fn refresh_renamed(&mut self, id: ItemId) {
        let Some(item) = self.arena.get(id) else {
            return;
        };
        let mut scratch = item.clone();
        if let Err(err) = self.engine.refresh(&mut scratch) {
            debug!("renamed path not readable yet: {err}");
        }
        scratch.icon = self.engine.get_icon(&scratch);
        scratch.icon_state = IconState::Final;
        if let Some(item) = self.arena.get_mut(id) {
            *item = scratch;
        }
    }

    /// Watch subscriptions are keyed by path, so a rename must re-register
    /// every populated folder in the renamed subtree under its rewritten
    /// path or the subtree silently stops receiving change events.
    fn resubscribe_renamed(&mut self, id: ItemId, old_prefix: &Path) {
        if self.watch.is_none() {
            return;
        }
        if let Some(bridge) = self.watch.as_mut() {
            bridge.unsubscribe_under(old_prefix);
        }
        let mut stack = vec![id];
        let mut rewatch = Vec::new();
        while let Some(node) = stack.pop() {
            if let Some(item) = self.arena.get(node) {
                if item.is_folder && item.state.all_children_fetched() {
                    rewatch.push(item.path.clone());
                }
            }
            stack.extend_from_slice(self.arena.children(node));
        }
        for path in rewatch {
            self.subscribe_watch(&path);
        }
    }

    fn handle_folder_updated(&mut self, path: &Path) {
        let Some(id) = self.find_by_path(path) else {
            return;
        };
        let Some(item) = self.arena.get(id) else {
            return;
        };
        if item.state.is_locked() || !item.is_folder {
            return;
        }
        self.refresh(id);
    }

    /// Change the sort order and re-sort every populated child list.
    pub fn set_sort(&mut self, spec: SortSpec) {
        if self.sort == spec {
            return;
        }
        self.sort = spec;
        let Some(root) = self.root else {
            return;
        };
        self.emit(ModelEvent::ResetBegan);
        self.resort_recursive(root);
        self.emit(ModelEvent::ResetEnded { root });
    }

    fn resort_recursive(&mut self, id: ItemId) {
        let children: Vec<ItemId> = self.arena.children(id).to_vec();
        if children.len() > 1 {
            let mut order = children.clone();
            order.sort_by(|a, b| {
                let (Some(ia), Some(ib)) = (self.arena.get(*a), self.arena.get(*b)) else {
                    return std::cmp::Ordering::Equal;
                };
                compare_items(ia, ib, self.sort)
            });
            for child in &children {
                self.arena.detach_child(id, *child);
            }
            for (row, child) in order.iter().enumerate() {
                self.arena.attach_child(id, *child, row);
            }
        }
        for child in children {
            self.resort_recursive(child);
        }
    }

    /// Run a GC sweep if the interval elapsed.
    pub fn maybe_sweep(&mut self, now: Instant) {
        if !self.gc_timer.due(now) {
            return;
        }
        self.sweep_now();
        self.gc_timer.mark_swept(now);
    }

    /// Sweep the pending-garbage list: evict the children of every queued
    /// node still unreferenced. The node itself stays as a placeholder
    /// that refetches on demand.
    pub fn sweep_now(&mut self) {
        for id in self.ledger.take_sweepable() {
            if !self.arena.contains(id) {
                continue;
            }
            if self
                .arena
                .get(id)
                .map(|item| item.state.is_locked())
                .unwrap_or(true)
            {
                continue;
            }
            let path = self.arena.get(id).map(|item| item.path.clone());
            if let (Some(bridge), Some(path)) = (self.watch.as_mut(), path.as_ref()) {
                bridge.unsubscribe_under(path);
            }
            debug!(
                "gc evicting children of {}",
                path.as_deref().unwrap_or(Path::new("?")).display()
            );
            self.remove_all_children(id);
            if let Some(item) = self.arena.get_mut(id) {
                item.state = PopulateState::Unfetched;
            }
            self.emit_cell_changed(id, TAG_FETCHED);
        }
    }

    fn remove_all_children(&mut self, id: ItemId) {
        let (count, freed) = self.arena.free_children(id);
        for freed_id in &freed {
            self.ledger.purge(*freed_id);
        }
        if count > 0 {
            self.emit(ModelEvent::RowsRemoved {
                parent: id,
                first: 0,
                last: count - 1,
            });
        }
    }

    fn remove_all_children_silently(&mut self, id: ItemId) {
        let (_, freed) = self.arena.free_children(id);
        for freed_id in freed {
            self.ledger.purge(freed_id);
        }
    }

    fn sorted_row(&self, parent: ItemId, item: &TreeItem) -> usize {
        let children = self.arena.children(parent);
        children
            .iter()
            .position(|existing| {
                self.arena
                    .get(*existing)
                    .map(|other| compare_items(item, other, self.sort) == std::cmp::Ordering::Less)
                    .unwrap_or(false)
            })
            .unwrap_or(children.len())
    }

    fn subscribe_watch(&mut self, path: &Path) {
        if let Some(bridge) = self.watch.as_mut() {
            if let Err(err) = bridge.subscribe(path) {
                warn!("{err}");
            }
        }
    }

    fn emit_cell_changed(&mut self, id: ItemId, tags: u32) {
        let row = self.arena.row_of(id).unwrap_or(0);
        self.emit(ModelEvent::CellChanged { item: id, row, tags });
    }

    fn emit(&mut self, event: ModelEvent) {
        self.observers
            .retain(|observer| observer.send(event.clone()).is_ok());
    }
}
