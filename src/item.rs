use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Sentinel for an unknown size (e.g. an unpopulated folder).
pub const SIZE_UNKNOWN: u64 = u64::MAX;

pub const CAP_COPY: u32 = 1 << 0;
pub const CAP_MOVE: u32 = 1 << 1;
pub const CAP_LINK: u32 = 1 << 2;
pub const CAP_RENAME: u32 = 1 << 3;
pub const CAP_DELETE: u32 = 1 << 4;
pub const CAP_DROP_TARGET: u32 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MediaKind {
    Unknown,
    Removable,
    Fixed,
    Remote,
    Optical,
    Ramdisk,
}

impl Default for MediaKind {
    fn default() -> Self {
        MediaKind::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IconState {
    #[default]
    None,
    Placeholder,
    Final,
}

/// Opaque handle to a platform icon resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconHandle(pub u64);

/// Population lifecycle of a node's child list.
///
/// `Fetching` doubles as the node lock: no second fetch may start and no
/// external mutation of the child list may happen until it clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopulateState {
    #[default]
    Unfetched,
    Fetching,
    Fetched,
    Error,
    Aborted,
}

impl PopulateState {
    pub fn is_locked(self) -> bool {
        self == PopulateState::Fetching
    }

    pub fn all_children_fetched(self) -> bool {
        self == PopulateState::Fetched
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub code: i32,
    pub message: String,
}

/// One entry in the cached filesystem tree: a file, folder, or drive.
///
/// Structural fields (parent, children, child_index) are written only by
/// the arena; everything else is plain metadata.
#[derive(Debug, Clone)]
pub struct TreeItem {
    pub path: PathBuf,
    pub display_name: String,
    pub extension: String,
    pub size: u64,
    pub type_label: String,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub capabilities: u32,
    pub media: MediaKind,
    pub is_folder: bool,
    pub is_drive: bool,
    pub is_hidden: bool,
    pub has_subfolders: bool,
    pub state: PopulateState,
    pub icon_state: IconState,
    pub icon: Option<IconHandle>,
    pub error: Option<ItemError>,
}

impl TreeItem {
    pub fn new(path: PathBuf, is_folder: bool) -> Self {
        let display_name = display_name_of(&path);
        let extension = extension_of(&path, is_folder);
        Self {
            path,
            display_name,
            extension,
            size: SIZE_UNKNOWN,
            type_label: String::new(),
            created: None,
            accessed: None,
            modified: None,
            capabilities: 0,
            media: MediaKind::Unknown,
            is_folder,
            is_drive: false,
            is_hidden: false,
            has_subfolders: false,
            state: PopulateState::default(),
            icon_state: IconState::default(),
            icon: None,
            error: None,
        }
    }

    pub fn has_capability(&self, cap: u32) -> bool {
        self.capabilities & cap != 0
    }

    /// Re-derive the fields that depend on the path after a rename. The
    /// new name can change the file category, so the icon goes back to
    /// placeholder until the backend refreshes it.
    pub fn apply_renamed_path(&mut self, new_path: PathBuf) {
        self.display_name = display_name_of(&new_path);
        self.extension = extension_of(&new_path, self.is_folder);
        self.path = new_path;
        self.type_label.clear();
        if self.icon_state == IconState::Final {
            self.icon_state = IconState::Placeholder;
        }
    }

    pub fn set_error(&mut self, code: i32, message: String) {
        self.error = Some(ItemError { code, message });
        self.state = PopulateState::Error;
    }

    /// Clear terminal fetch states so a new fetch may begin. `Fetching`
    /// can only be entered from `Unfetched`.
    pub fn clear_error(&mut self) {
        self.error = None;
        if self.state == PopulateState::Error || self.state == PopulateState::Aborted {
            self.state = PopulateState::Unfetched;
        }
    }
}

pub fn display_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn extension_of(path: &Path, is_folder: bool) -> String {
    if is_folder {
        return String::new();
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_starts_unfetched_with_unknown_size() {
        let item = TreeItem::new(PathBuf::from("/tmp/report.PDF"), false);
        assert_eq!(item.state, PopulateState::Unfetched);
        assert_eq!(item.size, SIZE_UNKNOWN);
        assert_eq!(item.display_name, "report.PDF");
        assert_eq!(item.extension, "pdf");
    }

    #[test]
    fn folders_have_no_extension() {
        let item = TreeItem::new(PathBuf::from("/tmp/archive.d"), true);
        assert!(item.extension.is_empty());
    }

    #[test]
    fn rename_rederives_display_fields() {
        let mut item = TreeItem::new(PathBuf::from("/tmp/a.txt"), false);
        item.icon_state = IconState::Final;
        item.apply_renamed_path(PathBuf::from("/tmp/b.rs"));
        assert_eq!(item.display_name, "b.rs");
        assert_eq!(item.extension, "rs");
        assert_eq!(item.icon_state, IconState::Placeholder);
    }

    #[test]
    fn error_roundtrip_returns_to_unfetched() {
        let mut item = TreeItem::new(PathBuf::from("/gone"), true);
        item.set_error(2, "no such directory".into());
        assert_eq!(item.state, PopulateState::Error);
        item.clear_error();
        assert_eq!(item.state, PopulateState::Unfetched);
        assert!(item.error.is_none());
    }
}
