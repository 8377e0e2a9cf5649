//! The kernel notification channel consumed by the engine.
//!
//! A backend only knows how to register a single directory level at a time and how to hand out
//! raw record bytes. Everything above that (handle tables, emulated recursion, rename
//! correlation, backoff) lives in the engine and is shared by every backend.

use std::{fmt, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::mask::EventMask;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod inotify;
mod memory;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use inotify::InotifyBackend;
pub use memory::MemoryBackend;

/// Backend used by [`Watcher::open`](crate::Watcher::open) on this platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type RecommendedBackend = InotifyBackend;

/// Opaque identifier the kernel hands out for one registered watch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchHandle(i32);

impl WatchHandle {
	#[must_use]
	pub const fn new(raw: i32) -> Self {
		Self(raw)
	}

	#[must_use]
	pub const fn raw(self) -> i32 {
		self.0
	}

	/// Records that describe the channel itself (overflow, invalidation) carry a negative handle.
	#[must_use]
	pub const fn is_channel(self) -> bool {
		self.0 < 0
	}
}

impl fmt::Display for WatchHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A kernel notification channel.
///
/// All methods take `&self`: the channel is shared between the controller and the poll worker.
/// Only [`pending_bytes`](Backend::pending_bytes), [`read`](Backend::read) and
/// [`wait`](Backend::wait) may block.
pub trait Backend: Send + Sync + 'static {
	/// Short name used in logs.
	fn kind(&self) -> &'static str;

	/// Registers a watch for a single directory level (or a single file).
	fn register(&self, path: &Path, mask: EventMask) -> io::Result<WatchHandle>;

	fn deregister(&self, handle: WatchHandle) -> io::Result<()>;

	/// Number of record bytes that can be read without blocking.
	fn pending_bytes(&self) -> io::Result<usize>;

	/// Reads raw record bytes into `buf`, returning how many were read.
	fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

	/// Blocks until data is pending, [`interrupt`](Backend::interrupt) is called or `timeout`
	/// elapses. Returns whether the channel became readable.
	fn wait(&self, timeout: Duration) -> io::Result<bool>;

	/// Wakes a thread blocked in [`wait`](Backend::wait).
	fn interrupt(&self);

	/// Releases the channel. Calling it again is a no-op.
	fn close(&self) -> io::Result<()>;
}
