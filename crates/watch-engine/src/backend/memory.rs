use std::{
	collections::{HashMap, VecDeque},
	io,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::{Backend, WatchHandle};
use crate::{mask::EventMask, record::RawRecord};

/// Scriptable in-process channel.
///
/// Registration checks the real filesystem, so it pairs with temporary directories; records are
/// injected by hand and failures can be queued for any channel operation. Clones share the same
/// channel.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
	inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	channel: Mutex<Channel>,
	readable: Condvar,
}

#[derive(Debug, Default)]
struct Channel {
	next_handle: i32,
	watches: HashMap<WatchHandle, PathBuf>,
	bytes: Vec<u8>,
	register_failures: HashMap<PathBuf, io::ErrorKind>,
	pending_failures: VecDeque<io::ErrorKind>,
	read_failures: VecDeque<io::ErrorKind>,
	short_reads: usize,
	interrupted: bool,
	closed: bool,
}

impl MemoryBackend {
	/// Appends an encoded record to the pending bytes and wakes the waiting worker.
	pub fn inject(&self, record: &RawRecord) {
		self.inject_raw(&record.encode());
	}

	/// Appends arbitrary bytes, including malformed ones.
	pub fn inject_raw(&self, bytes: &[u8]) {
		self.inner.channel.lock().bytes.extend_from_slice(bytes);
		self.inner.readable.notify_all();
	}

	/// Every later registration of `path` fails with `kind`.
	pub fn fail_register(&self, path: &Path, kind: io::ErrorKind) {
		self.inner
			.channel
			.lock()
			.register_failures
			.insert(path.to_path_buf(), kind);
	}

	/// The next `times` pending byte queries fail with `kind`.
	pub fn fail_pending(&self, kind: io::ErrorKind, times: usize) {
		self.inner
			.channel
			.lock()
			.pending_failures
			.extend(std::iter::repeat(kind).take(times));
		self.inner.readable.notify_all();
	}

	/// The next `times` reads fail with `kind`.
	pub fn fail_read(&self, kind: io::ErrorKind, times: usize) {
		self.inner
			.channel
			.lock()
			.read_failures
			.extend(std::iter::repeat(kind).take(times));
	}

	/// The next `times` non-empty reads come back one byte short and consume nothing.
	pub fn short_read(&self, times: usize) {
		self.inner.channel.lock().short_reads += times;
	}

	/// Handle currently registered for `path`.
	#[must_use]
	pub fn handle(&self, path: &Path) -> Option<WatchHandle> {
		self.inner
			.channel
			.lock()
			.watches
			.iter()
			.find_map(|(handle, registered)| (registered == path).then_some(*handle))
	}

	/// Paths with a live registration, sorted.
	#[must_use]
	pub fn registered(&self) -> Vec<PathBuf> {
		let mut paths = self
			.inner
			.channel
			.lock()
			.watches
			.values()
			.cloned()
			.collect::<Vec<_>>();
		paths.sort();
		paths
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.inner.channel.lock().closed
	}
}

fn closed() -> io::Error {
	io::Error::new(io::ErrorKind::BrokenPipe, "memory channel closed")
}

impl Backend for MemoryBackend {
	fn kind(&self) -> &'static str {
		"memory"
	}

	fn register(&self, path: &Path, _mask: EventMask) -> io::Result<WatchHandle> {
		let mut channel = self.inner.channel.lock();
		if channel.closed {
			return Err(closed());
		}

		if let Some(kind) = channel.register_failures.get(path) {
			return Err(io::Error::from(*kind));
		}

		path.symlink_metadata()?;

		// Same target, same handle
		if let Some(handle) = channel
			.watches
			.iter()
			.find_map(|(handle, registered)| (registered == path).then_some(*handle))
		{
			return Ok(handle);
		}

		channel.next_handle += 1;
		let handle = WatchHandle::new(channel.next_handle);
		channel.watches.insert(handle, path.to_path_buf());
		trace!(%handle, path = %path.display(), "Memory watch registered");

		Ok(handle)
	}

	fn deregister(&self, handle: WatchHandle) -> io::Result<()> {
		let mut channel = self.inner.channel.lock();
		if channel.closed {
			return Err(closed());
		}

		channel
			.watches
			.remove(&handle)
			.map(|_| ())
			.ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
	}

	fn pending_bytes(&self) -> io::Result<usize> {
		let mut channel = self.inner.channel.lock();
		if let Some(kind) = channel.pending_failures.pop_front() {
			return Err(io::Error::from(kind));
		}
		if channel.closed {
			return Err(closed());
		}

		Ok(channel.bytes.len())
	}

	fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
		let mut channel = self.inner.channel.lock();
		if let Some(kind) = channel.read_failures.pop_front() {
			return Err(io::Error::from(kind));
		}
		if channel.closed {
			return Err(closed());
		}

		let len = buf.len().min(channel.bytes.len());
		if len > 0 && channel.short_reads > 0 {
			// Nothing is consumed, the next read sees the same bytes
			channel.short_reads -= 1;
			buf[..len - 1].copy_from_slice(&channel.bytes[..len - 1]);
			return Ok(len - 1);
		}

		buf[..len].copy_from_slice(&channel.bytes[..len]);
		channel.bytes.drain(..len);

		Ok(len)
	}

	fn wait(&self, timeout: Duration) -> io::Result<bool> {
		let mut channel = self.inner.channel.lock();

		let ready = |channel: &Channel| {
			channel.interrupted
				|| channel.closed
				|| !channel.bytes.is_empty()
				|| !channel.pending_failures.is_empty()
		};

		if !ready(&channel) {
			self.inner
				.readable
				.wait_while_for(&mut channel, |channel| !ready(&*channel), timeout);
		}

		channel.interrupted = false;

		Ok(!channel.bytes.is_empty())
	}

	fn interrupt(&self) {
		self.inner.channel.lock().interrupted = true;
		self.inner.readable.notify_all();
	}

	fn close(&self) -> io::Result<()> {
		let mut channel = self.inner.channel.lock();
		if !channel.closed {
			channel.closed = true;
			channel.watches.clear();
			channel.bytes.clear();
			trace!("Memory channel closed");
		}
		drop(channel);

		self.inner.readable.notify_all();
		Ok(())
	}
}
