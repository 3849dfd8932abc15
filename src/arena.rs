use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::item::TreeItem;

/// Stable handle to a node in the arena. Generations guard against reuse:
/// a handle to a freed slot stops resolving even after the slot is
/// recycled, so observers can hold handles across structural changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

struct Node {
    item: TreeItem,
    parent: Option<ItemId>,
    children: Vec<ItemId>,
    child_index: BTreeMap<PathBuf, ItemId>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of tree nodes. Owns every node exclusively; all structural links
/// (parent back-reference, ordered child sequence, path map) are mutated
/// here and nowhere else, which keeps the sequence and the map in
/// lock-step by construction.
#[derive(Default)]
pub struct TreeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl TreeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Insert a node with no parent. The caller attaches it afterwards
    /// (or keeps it as a root).
    pub fn insert_detached(&mut self, item: TreeItem) -> ItemId {
        let node = Node {
            item,
            parent: None,
            children: Vec::new(),
            child_index: BTreeMap::new(),
        };

        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            ItemId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            ItemId {
                index,
                generation: 0,
            }
        }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.node(id).is_some()
    }

    pub fn get(&self, id: ItemId) -> Option<&TreeItem> {
        self.node(id).map(|node| &node.item)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut TreeItem> {
        self.node_mut(id).map(|node| &mut node.item)
    }

    pub fn parent(&self, id: ItemId) -> Option<ItemId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: ItemId) -> &[ItemId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn child_count(&self, id: ItemId) -> usize {
        self.node(id).map(|node| node.children.len()).unwrap_or(0)
    }

    pub fn child_by_path(&self, parent: ItemId, path: &Path) -> Option<ItemId> {
        self.node(parent)
            .and_then(|node| node.child_index.get(path).copied())
    }

    /// Row of a node within its parent's ordered sequence. Roots have no
    /// row.
    pub fn row_of(&self, id: ItemId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.node(parent)
            .and_then(|node| node.children.iter().position(|child| *child == id))
    }

    /// Attach a detached node as a child at `row`. Fails (returning false)
    /// on stale handles, an already-attached child, a sibling path
    /// collision, or an out-of-range row.
    pub fn attach_child(&mut self, parent: ItemId, child: ItemId, row: usize) -> bool {
        let Some(child_node) = self.node(child) else {
            return false;
        };
        if child_node.parent.is_some() {
            return false;
        }
        let child_path = child_node.item.path.clone();

        let Some(parent_node) = self.node_mut(parent) else {
            return false;
        };
        if row > parent_node.children.len() || parent_node.child_index.contains_key(&child_path) {
            return false;
        }

        parent_node.children.insert(row, child);
        parent_node.child_index.insert(child_path, child);
        if let Some(child_node) = self.node_mut(child) {
            child_node.parent = Some(parent);
        }
        true
    }

    /// Detach a child from its parent, returning the row it occupied. The
    /// node itself stays alive (detached) in the arena.
    pub fn detach_child(&mut self, parent: ItemId, child: ItemId) -> Option<usize> {
        let child_path = self.node(child)?.item.path.clone();
        let parent_node = self.node_mut(parent)?;
        let row = parent_node
            .children
            .iter()
            .position(|entry| *entry == child)?;
        parent_node.children.remove(row);
        parent_node.child_index.remove(&child_path);
        if let Some(child_node) = self.node_mut(child) {
            child_node.parent = None;
        }
        Some(row)
    }

    /// Rewrite a node's path after a rename, updating its parent's map key
    /// and every descendant path under the old prefix. Returns false if the
    /// new path collides with a sibling.
    pub fn rename_node(&mut self, id: ItemId, new_path: PathBuf) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let old_path = node.item.path.clone();
        if old_path == new_path {
            return true;
        }

        if let Some(parent) = node.parent {
            let Some(parent_node) = self.node_mut(parent) else {
                return false;
            };
            if parent_node.child_index.contains_key(&new_path) {
                return false;
            }
            parent_node.child_index.remove(&old_path);
            parent_node.child_index.insert(new_path.clone(), id);
        }

        if let Some(node) = self.node_mut(id) {
            node.item.apply_renamed_path(new_path.clone());
        }
        self.rewrite_descendant_paths(id, &old_path, &new_path);
        true
    }

    fn rewrite_descendant_paths(&mut self, id: ItemId, old_prefix: &Path, new_prefix: &Path) {
        let children: Vec<ItemId> = self.children(id).to_vec();
        let mut rebuilt = BTreeMap::new();
        for child in children {
            let Some(child_node) = self.node(child) else {
                continue;
            };
            let rewritten = match child_node.item.path.strip_prefix(old_prefix) {
                Ok(rest) => new_prefix.join(rest),
                Err(_) => child_node.item.path.clone(),
            };
            if let Some(child_node) = self.node_mut(child) {
                child_node.item.path = rewritten.clone();
            }
            rebuilt.insert(rewritten, child);
            self.rewrite_descendant_paths(child, old_prefix, new_prefix);
        }
        if let Some(node) = self.node_mut(id) {
            node.child_index = rebuilt;
        }
    }

    /// Free a node and its whole subtree, detaching it from its parent
    /// first. Returns every freed id so callers can purge side tables.
    pub fn free_subtree(&mut self, id: ItemId) -> Vec<ItemId> {
        if let Some(parent) = self.parent(id) {
            self.detach_child(parent, id);
        }
        let mut freed = Vec::new();
        self.free_recursive(id, &mut freed);
        freed
    }

    /// Free all children of a node, leaving the node itself in place as a
    /// refetchable placeholder. Returns (prior child count, freed ids).
    pub fn free_children(&mut self, id: ItemId) -> (usize, Vec<ItemId>) {
        let children: Vec<ItemId> = self.children(id).to_vec();
        let count = children.len();
        let mut freed = Vec::new();
        for child in children {
            self.free_recursive(child, &mut freed);
        }
        if let Some(node) = self.node_mut(id) {
            node.children.clear();
            node.child_index.clear();
        }
        (count, freed)
    }

    fn free_recursive(&mut self, id: ItemId, freed: &mut Vec<ItemId>) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let children = std::mem::take(&mut node.children);
        for child in children {
            self.free_recursive(child, freed);
        }
        let slot = &mut self.slots[id.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        freed.push(id);
    }

    /// Resolve an absolute path by walking the child path maps down from
    /// `root`. Returns None when any intermediate component is missing.
    pub fn resolve_path(&self, root: ItemId, path: &Path) -> Option<ItemId> {
        let root_path = self.node(root)?.item.path.clone();
        if root_path == path {
            return Some(root);
        }
        let rest = path.strip_prefix(&root_path).ok()?;

        let mut current = root;
        let mut current_path = root_path;
        for component in rest.components() {
            current_path.push(component);
            current = self
                .node(current)?
                .child_index
                .get(current_path.as_path())
                .copied()?;
        }
        Some(current)
    }

    /// Walk from a node up to its root, inclusive.
    pub fn ancestor_chain(&self, id: ItemId) -> Vec<ItemId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if !self.contains(node_id) {
                break;
            }
            chain.push(node_id);
            current = self.parent(node_id);
        }
        chain
    }

    fn node(&self, id: ItemId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: ItemId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn item(path: &str, is_folder: bool) -> TreeItem {
        TreeItem::new(PathBuf::from(path), is_folder)
    }

    fn small_tree(arena: &mut TreeArena) -> (ItemId, ItemId, ItemId) {
        let root = arena.insert_detached(item("/r", true));
        let a = arena.insert_detached(item("/r/a", true));
        let b = arena.insert_detached(item("/r/b", false));
        assert!(arena.attach_child(root, a, 0));
        assert!(arena.attach_child(root, b, 1));
        (root, a, b)
    }

    #[test]
    fn sequence_and_map_stay_in_sync() {
        let mut arena = TreeArena::new();
        let (root, a, b) = small_tree(&mut arena);

        assert_eq!(arena.children(root), &[a, b]);
        assert_eq!(arena.child_by_path(root, Path::new("/r/a")), Some(a));
        assert_eq!(arena.child_by_path(root, Path::new("/r/b")), Some(b));
        assert_eq!(arena.row_of(a), Some(0));
        assert_eq!(arena.row_of(b), Some(1));
        assert_eq!(arena.parent(a), Some(root));

        let row = arena.detach_child(root, a).expect("detach");
        assert_eq!(row, 0);
        assert_eq!(arena.children(root), &[b]);
        assert!(arena.child_by_path(root, Path::new("/r/a")).is_none());
        assert!(arena.parent(a).is_none());
        assert_eq!(arena.row_of(b), Some(0));
    }

    #[test]
    fn duplicate_sibling_path_is_rejected() {
        let mut arena = TreeArena::new();
        let (root, _, _) = small_tree(&mut arena);
        let dup = arena.insert_detached(item("/r/a", false));
        assert!(!arena.attach_child(root, dup, 2));
        assert_eq!(arena.child_count(root), 2);
    }

    #[test]
    fn freed_handles_stop_resolving() {
        let mut arena = TreeArena::new();
        let (root, a, _) = small_tree(&mut arena);
        let sub = arena.insert_detached(item("/r/a/sub", true));
        assert!(arena.attach_child(a, sub, 0));

        let freed = arena.free_subtree(a);
        assert_eq!(freed.len(), 2);
        assert!(!arena.contains(a));
        assert!(!arena.contains(sub));
        assert_eq!(arena.child_count(root), 1);

        // A recycled slot must not resurrect the old handle.
        let fresh = arena.insert_detached(item("/r/c", false));
        assert!(arena.contains(fresh));
        assert!(!arena.contains(a));
    }

    #[test]
    fn free_children_leaves_placeholder() {
        let mut arena = TreeArena::new();
        let (root, a, _) = small_tree(&mut arena);
        let sub = arena.insert_detached(item("/r/a/sub", true));
        assert!(arena.attach_child(a, sub, 0));

        let (count, freed) = arena.free_children(a);
        assert_eq!(count, 1);
        assert_eq!(freed, vec![sub]);
        assert!(arena.contains(a));
        assert_eq!(arena.child_count(a), 0);
        assert_eq!(arena.parent(a), Some(root));
    }

    #[test]
    fn rename_rewrites_descendants_and_map_keys() {
        let mut arena = TreeArena::new();
        let (root, a, _) = small_tree(&mut arena);
        let sub = arena.insert_detached(item("/r/a/sub", true));
        let leaf = arena.insert_detached(item("/r/a/sub/leaf.txt", false));
        assert!(arena.attach_child(a, sub, 0));
        assert!(arena.attach_child(sub, leaf, 0));

        assert!(arena.rename_node(a, PathBuf::from("/r/z")));
        assert_eq!(arena.get(a).unwrap().path, Path::new("/r/z"));
        assert_eq!(arena.get(a).unwrap().display_name, "z");
        assert_eq!(arena.get(sub).unwrap().path, Path::new("/r/z/sub"));
        assert_eq!(arena.get(leaf).unwrap().path, Path::new("/r/z/sub/leaf.txt"));
        assert_eq!(arena.child_by_path(root, Path::new("/r/z")), Some(a));
        assert!(arena.child_by_path(root, Path::new("/r/a")).is_none());
        assert_eq!(arena.child_by_path(sub, Path::new("/r/z/sub/leaf.txt")), Some(leaf));
    }

    #[test]
    fn rename_to_sibling_path_is_rejected() {
        let mut arena = TreeArena::new();
        let (_, a, _) = small_tree(&mut arena);
        assert!(!arena.rename_node(a, PathBuf::from("/r/b")));
        assert_eq!(arena.get(a).unwrap().path, Path::new("/r/a"));
    }

    #[test]
    fn resolve_path_walks_intermediate_levels() {
        let mut arena = TreeArena::new();
        let (root, a, _) = small_tree(&mut arena);
        let sub = arena.insert_detached(item("/r/a/sub", true));
        assert!(arena.attach_child(a, sub, 0));

        assert_eq!(arena.resolve_path(root, Path::new("/r")), Some(root));
        assert_eq!(arena.resolve_path(root, Path::new("/r/a/sub")), Some(sub));
        assert!(arena.resolve_path(root, Path::new("/r/a/other")).is_none());
        assert!(arena.resolve_path(root, Path::new("/elsewhere")).is_none());
    }

    #[test]
    fn ancestor_chain_reaches_root() {
        let mut arena = TreeArena::new();
        let (root, a, _) = small_tree(&mut arena);
        let sub = arena.insert_detached(item("/r/a/sub", true));
        assert!(arena.attach_child(a, sub, 0));
        assert_eq!(arena.ancestor_chain(sub), vec![sub, a, root]);
    }
}
