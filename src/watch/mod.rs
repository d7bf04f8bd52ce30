// src/watch/mod.rs

//! Model file watching.
//!
//! Turns real edits of the model file into `notify_model_changed()` calls:
//! - a `notify` watcher on the file's directory (`watcher.rs`),
//! - content hashing with `blake3` so saves without changes are ignored
//!   (`hash.rs`).

pub mod hash;
pub mod watcher;

pub use hash::{content_hash, ContentTracker};
pub use watcher::{spawn_model_watcher, WatcherHandle};
