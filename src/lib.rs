//! Asynchronous filesystem tree cache: a lazily-populated in-memory tree
//! mirroring a real filesystem, kept consistent under background
//! population, live change notifications, locale-style ordering, and
//! refcount-driven eviction.

pub mod arena;
pub mod backend;
pub mod collate;
pub mod config;
pub mod engine;
pub mod gc;
pub mod item;
pub mod model;
pub mod util;
pub mod watch;
