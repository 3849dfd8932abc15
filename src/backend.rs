use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use log::warn;
use walkdir::WalkDir;

use crate::item::{
    self, CAP_COPY, CAP_DELETE, CAP_DROP_TARGET, CAP_LINK, CAP_MOVE, CAP_RENAME, IconHandle,
    IconState, MediaKind, SIZE_UNKNOWN, TreeItem,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub code: i32,
    pub message: String,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<io::Error> for BackendError {
    fn from(value: io::Error) -> Self {
        BackendError {
            code: value.raw_os_error().unwrap_or(-1),
            message: value.to_string(),
        }
    }
}

/// Cooperative cancellation token handed into enumeration calls. The
/// enumeration loop must consult it at least once per entry so a
/// superseding fetch is observed within one filesystem-entry's cost.
#[derive(Clone)]
pub struct CancelToken {
    counter: Arc<AtomicU64>,
    job_id: u64,
}

impl CancelToken {
    pub fn new(counter: Arc<AtomicU64>, job_id: u64) -> Self {
        Self { counter, job_id }
    }

    /// Token that never cancels, for synchronous one-shot calls.
    pub fn never() -> Self {
        let counter = Arc::new(AtomicU64::new(0));
        Self { counter, job_id: 0 }
    }

    pub fn is_cancelled(&self) -> bool {
        self.counter.load(Ordering::SeqCst) != self.job_id
    }
}

/// Detached candidate for a child node, built off-thread and handed to
/// the controller at fetch completion. Never references the live tree.
#[derive(Debug, Clone)]
pub struct ChildSnapshot {
    pub path: PathBuf,
    pub is_folder: bool,
    pub is_hidden: bool,
    pub size: u64,
    pub type_label: String,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub has_subfolders: bool,
    pub media: MediaKind,
}

impl ChildSnapshot {
    pub fn into_item(self) -> TreeItem {
        let mut item = TreeItem::new(self.path, self.is_folder);
        item.is_hidden = self.is_hidden;
        item.size = self.size;
        item.type_label = self.type_label;
        item.created = self.created;
        item.accessed = self.accessed;
        item.modified = self.modified;
        item.has_subfolders = self.has_subfolders;
        item.media = self.media;
        item.capabilities = default_capabilities(item.is_folder);
        item.icon_state = IconState::Placeholder;
        item
    }
}

#[derive(Debug)]
pub enum Enumeration {
    Complete(Vec<ChildSnapshot>),
    Cancelled,
}

/// Platform enumeration backend. Implementations fill attributes of a
/// single item or enumerate one directory level; they never mutate tree
/// structure.
pub trait Backend: Send + Sync {
    fn populate_self(&self, item: &mut TreeItem) -> Result<(), BackendError>;

    fn enumerate_children(
        &self,
        path: &Path,
        token: &CancelToken,
    ) -> Result<Enumeration, BackendError>;

    fn get_icon(&self, item: &TreeItem) -> Option<IconHandle>;

    /// Re-read one item's attributes in place. Structure is untouched.
    fn refresh(&self, item: &mut TreeItem) -> Result<(), BackendError>;

    fn will_recycle(&self, item: &TreeItem) -> bool;

    fn set_display_name_of(&self, item: &TreeItem, name: &str) -> Result<PathBuf, BackendError>;
}

fn default_capabilities(is_folder: bool) -> u32 {
    let mut caps = CAP_COPY | CAP_MOVE | CAP_LINK | CAP_RENAME | CAP_DELETE;
    if is_folder {
        caps |= CAP_DROP_TARGET;
    }
    caps
}

/// Standard-filesystem backend over `std::fs` and a single-level walkdir.
#[derive(Default)]
pub struct FsBackend {
    pub include_hidden: bool,
}

impl FsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn fill_from_metadata(item: &mut TreeItem, metadata: &fs::Metadata) {
        item.is_folder = metadata.is_dir();
        item.size = if metadata.is_file() {
            metadata.len()
        } else {
            SIZE_UNKNOWN
        };
        item.created = metadata.created().ok();
        item.accessed = metadata.accessed().ok();
        item.modified = metadata.modified().ok();
        item.extension = item::extension_of(&item.path, item.is_folder);
        item.is_hidden = is_hidden_path(&item.path);
        item.is_drive = item.path.parent().is_none();
        item.media = if item.is_drive {
            MediaKind::Fixed
        } else {
            MediaKind::Unknown
        };
        item.type_label = type_label_for(&item.path, item.is_folder, item.is_drive);
        item.capabilities = if item.is_drive {
            CAP_DROP_TARGET
        } else {
            default_capabilities(item.is_folder)
        };
        if item.is_folder {
            item.has_subfolders = probe_has_subfolders(&item.path);
        }
    }
}

impl Backend for FsBackend {
    fn populate_self(&self, item: &mut TreeItem) -> Result<(), BackendError> {
        let metadata = fs::symlink_metadata(&item.path)?;
        Self::fill_from_metadata(item, &metadata);
        item.icon_state = IconState::Placeholder;
        Ok(())
    }

    fn enumerate_children(
        &self,
        path: &Path,
        token: &CancelToken,
    ) -> Result<Enumeration, BackendError> {
        // Surface an unreadable directory as a failure up front rather
        // than an empty listing.
        fs::read_dir(path)?;

        let mut children = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
        {
            if token.is_cancelled() {
                return Ok(Enumeration::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("enumerate skip under {}: {err}", path.display());
                    continue;
                }
            };
            let child_path = entry.path().to_path_buf();
            let hidden = is_hidden_path(&child_path);
            if hidden && !self.include_hidden {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("metadata skip for {}: {err}", child_path.display());
                    continue;
                }
            };

            let is_folder = metadata.is_dir();
            if !is_folder && !metadata.is_file() {
                continue;
            }

            children.push(ChildSnapshot {
                type_label: type_label_for(&child_path, is_folder, false),
                is_folder,
                is_hidden: hidden,
                size: if is_folder { SIZE_UNKNOWN } else { metadata.len() },
                created: metadata.created().ok(),
                accessed: metadata.accessed().ok(),
                modified: metadata.modified().ok(),
                has_subfolders: is_folder && probe_has_subfolders(&child_path),
                media: MediaKind::Unknown,
                path: child_path,
            });
        }

        if token.is_cancelled() {
            return Ok(Enumeration::Cancelled);
        }
        Ok(Enumeration::Complete(children))
    }

    fn get_icon(&self, item: &TreeItem) -> Option<IconHandle> {
        // Stable surrogate handle keyed off the display category; a real
        // shell backend would return a platform icon resource here.
        let key = if item.is_drive {
            "drive".to_string()
        } else if item.is_folder {
            "folder".to_string()
        } else {
            item.extension.clone()
        };
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in key.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        Some(IconHandle(hash))
    }

    fn refresh(&self, item: &mut TreeItem) -> Result<(), BackendError> {
        let metadata = fs::symlink_metadata(&item.path)?;
        Self::fill_from_metadata(item, &metadata);
        Ok(())
    }

    fn will_recycle(&self, _item: &TreeItem) -> bool {
        false
    }

    fn set_display_name_of(&self, item: &TreeItem, name: &str) -> Result<PathBuf, BackendError> {
        let Some(parent) = item.path.parent() else {
            return Err(BackendError {
                code: -1,
                message: "cannot rename a root".to_string(),
            });
        };
        let target = parent.join(name);
        fs::rename(&item.path, &target)?;
        Ok(target)
    }
}

fn is_hidden_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn type_label_for(path: &Path, is_folder: bool, is_drive: bool) -> String {
    if is_drive {
        return "Drive".to_string();
    }
    if is_folder {
        return "Folder".to_string();
    }
    let ext = item::extension_of(path, false);
    if ext.is_empty() {
        "File".to_string()
    } else {
        format!("{} File", ext.to_ascii_uppercase())
    }
}

/// Bounded probe: stop at the first subdirectory found.
fn probe_has_subfolders(path: &Path) -> bool {
    WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_type().is_dir())
}
