//! Watcher configuration

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
	error::{Error, FileIOError, Result},
	mask::EventMask,
};

/// Configuration for a [`Watcher`](crate::Watcher) and its poll worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
	/// Consecutive I/O failures tolerated before the poll loop gives up (default: 3)
	pub max_consecutive_errors: u32,

	/// Unit of the idle backoff, in milliseconds (default: 1s)
	pub idle_backoff_ms: u64,

	/// Cap of the exponential idle backoff, in milliseconds (default: 8s)
	pub max_idle_backoff_ms: u64,

	/// Consecutive empty polls after which the channel is considered dead.
	/// `None` keeps waiting forever, idle periods being normal.
	pub starvation_limit: Option<u32>,

	/// Events requested for every watch
	pub watch_mask: EventMask,

	/// Fold case when comparing watched paths
	pub case_insensitive: bool,

	/// Name of the poll worker thread
	pub thread_name: String,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			max_consecutive_errors: 3,
			idle_backoff_ms: 1000,
			max_idle_backoff_ms: 8000,
			starvation_limit: None,
			watch_mask: EventMask::default_watch(),
			case_insensitive: false,
			thread_name: "watch-poll".to_string(),
		}
	}
}

impl WatcherConfig {
	/// Load configuration from a JSON file; missing fields take their defaults
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		info!("Loading watcher config from {}", path.display());

		let json = fs::read_to_string(path).map_err(|e| {
			FileIOError::from_std_io_err_with_msg(path, e, "reading watcher config")
		})?;

		serde_json::from_str(&json).map_err(Error::from)
	}

	/// Sleep before the next poll after `idle_polls` consecutive empty polls (1-based).
	///
	/// Grows exponentially from one backoff unit up to the configured cap.
	#[must_use]
	pub fn idle_backoff(&self, idle_polls: u32) -> Duration {
		let factor = 1u64 << idle_polls.saturating_sub(1).min(16);
		Duration::from_millis(
			self.idle_backoff_ms
				.saturating_mul(factor)
				.min(self.max_idle_backoff_ms.max(self.idle_backoff_ms)),
		)
	}
}
