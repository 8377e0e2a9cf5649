//!
//! # Watch Engine
//!
//! Filesystem change notifications on top of a kernel channel that only watches one directory
//! level at a time (inotify and friends).
//!
//! The engine keeps the table of watch handles, emulates recursive watches by registering every
//! subdirectory (and every directory created later under a recursive watch), pairs the two halves
//! of a rename into a single event and hands a normalized stream of [`WatchEvent`]s to observers.
//! A dedicated worker thread polls the channel with backoff; the controller API can be used from
//! any thread, including from inside event handlers.
//!
//! ## Basic example
//!
//! ```
//! use sd_watch_engine::{MemoryBackend, WatchEvent, Watcher, WatcherConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::create_dir(dir.path().join("photos")).unwrap();
//!
//! let watcher = Watcher::new(MemoryBackend::default(), WatcherConfig::default());
//! let (tx, rx) = std::sync::mpsc::channel();
//! watcher.subscribe(tx);
//!
//! watcher.add_watch(dir.path(), true).unwrap();
//! assert!(watcher.has_watch(dir.path().join("photos")));
//! assert!(matches!(rx.recv().unwrap(), WatchEvent::WatchAdded(_)));
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod backend;
mod config;
mod dispatch;
mod error;
mod event;
mod mask;
pub mod path;
mod poll;
pub mod record;
mod rename;
mod state;
mod table;
mod tree;
mod watcher;

pub use backend::{Backend, MemoryBackend, WatchHandle};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use backend::{InotifyBackend, RecommendedBackend};
pub use config::WatcherConfig;
pub use error::{ContractViolation, Error, FileIOError, Result};
pub use event::{EventHandler, SubscriptionId, WatchEvent};
pub use mask::EventMask;
pub use poll::PollState;
pub use record::RawRecord;
pub use rename::{MoveHalf, Rename, RenameCorrelator};
pub use table::WatchTable;
pub use tree::{NodeId, RecursiveWatchTree};
pub use watcher::Watcher;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use watcher::RecommendedWatcher;
