use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collate::SortSpec;
use crate::gc::GcConfig;
use crate::watch::WatchConfig;

/// Startup configuration for one model instance. This is a pure input:
/// the settings collaborator that persists it lives outside the core, so
/// it round-trips through JSON and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub enable_watcher: bool,
    pub watch_poll_secs: u64,
    pub gc_sweep_secs: u64,
    pub sort: SortSpec,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enable_watcher: true,
            watch_poll_secs: 2,
            gc_sweep_secs: 5 * 60,
            sort: SortSpec::default(),
        }
    }
}

impl ModelConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_secs(self.watch_poll_secs.max(1)),
        }
    }

    pub fn gc_config(&self) -> GcConfig {
        GcConfig {
            sweep_interval: Duration::from_secs(self.gc_sweep_secs.max(1)),
        }
    }
}
