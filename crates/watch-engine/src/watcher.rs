//! The platform-neutral controller: add, remove and query watches while a worker polls the channel.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, instrument, warn};

use crate::{
	backend::Backend,
	config::WatcherConfig,
	error::{Error, Result},
	event::{EventHandler, Observers, SubscriptionId, WatchEvent},
	path::normalize,
	poll::{self, PollControl, PollState},
	state::{Deregister, WatchState},
};

/// State shared between the controller and its poll worker.
pub(crate) struct Shared<B> {
	pub(crate) backend: B,
	pub(crate) config: WatcherConfig,
	pub(crate) state: Mutex<WatchState>,
	pub(crate) observers: Observers,
	pub(crate) control: PollControl,
}

/// Watches paths on a [`Backend`], optionally recursively, and reports [`WatchEvent`]s.
///
/// Every method takes `&self`, so a watcher can be shared (for example in an `Arc`) and called
/// from inside its own event handlers.
pub struct Watcher<B: Backend> {
	shared: Arc<Shared<B>>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub type RecommendedWatcher = Watcher<crate::backend::RecommendedBackend>;

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Watcher<crate::backend::RecommendedBackend> {
	/// Opens the platform's notification channel and starts polling it.
	pub fn open(config: WatcherConfig) -> Result<Self> {
		let watcher = Self::new(crate::backend::RecommendedBackend::open()?, config);
		watcher.start()?;
		Ok(watcher)
	}
}

impl<B: Backend> Watcher<B> {
	/// Wraps an already opened channel. Nothing is polled until [`start`](Self::start).
	pub fn new(backend: B, config: WatcherConfig) -> Self {
		debug!(backend = backend.kind(), ?config, "Creating watcher");

		Self {
			shared: Arc::new(Shared {
				state: Mutex::new(WatchState::new(config.watch_mask, config.case_insensitive)),
				backend,
				config,
				observers: Observers::default(),
				control: PollControl::default(),
			}),
			worker: Mutex::new(None),
		}
	}

	/// Spawns the poll worker.
	pub fn start(&self) -> Result<()> {
		let result = self.spawn_worker();
		self.finish(Vec::new(), result)
	}

	fn spawn_worker(&self) -> Result<()> {
		if !self
			.shared
			.control
			.transition(PollState::Idle, PollState::Running)
		{
			return Err(match self.shared.control.state() {
				PollState::Running => Error::AlreadyStarted,
				_ => Error::Stopped,
			});
		}

		let shared = Arc::clone(&self.shared);
		let handle = thread::Builder::new()
			.name(self.shared.config.thread_name.clone())
			.spawn(move || poll::run(&shared))
			.map_err(|e| {
				self.shared
					.control
					.transition(PollState::Running, PollState::Idle);
				Error::Spawn(e)
			})?;

		*self.worker.lock() = Some(handle);
		Ok(())
	}

	/// Watches `path`; with `recursive`, every directory below it as well, including the ones
	/// created later.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
	pub fn add_watch(&self, path: impl AsRef<Path>, recursive: bool) -> Result<()> {
		let mut outbox = Vec::new();
		let result = self.try_add_watch(path.as_ref(), recursive, &mut outbox);
		self.finish(outbox, result)
	}

	fn try_add_watch(
		&self,
		path: &Path,
		recursive: bool,
		outbox: &mut Vec<WatchEvent>,
	) -> Result<()> {
		if path.as_os_str().is_empty() {
			return Err(Error::EmptyPath);
		}

		let mut state = self.shared.state.lock();
		if self.is_shut_down() {
			return Err(Error::Stopped);
		}

		state.add_watch(&self.shared.backend, normalize(path), recursive, None, outbox)
	}

	/// Stops watching `path` and everything a recursive watch added below it.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
	pub fn remove_watch(&self, path: impl AsRef<Path>) -> Result<()> {
		let mut outbox = Vec::new();
		let result = self.try_remove_watch(path.as_ref(), &mut outbox);
		self.finish(outbox, result)
	}

	fn try_remove_watch(&self, path: &Path, outbox: &mut Vec<WatchEvent>) -> Result<()> {
		if path.as_os_str().is_empty() {
			return Err(Error::EmptyPath);
		}

		let mut state = self.shared.state.lock();
		state.remove_watch(
			&self.shared.backend,
			&normalize(path),
			self.deregister_mode(),
			outbox,
		)
	}

	#[must_use]
	pub fn has_watch(&self, path: impl AsRef<Path>) -> bool {
		let path = path.as_ref();
		!path.as_os_str().is_empty() && self.shared.state.lock().table.contains_path(&normalize(path))
	}

	/// Every path with an active watch, including the ones added by recursion.
	#[must_use]
	pub fn watched_paths(&self) -> Vec<PathBuf> {
		let mut paths = self
			.shared
			.state
			.lock()
			.table
			.paths()
			.map(Path::to_path_buf)
			.collect::<Vec<_>>();
		paths.sort();
		paths
	}

	/// Asks the poll worker to stop; returns before it has exited, see [`join`](Self::join).
	///
	/// An unstarted watcher releases its channel right away. Calling it again is a no-op.
	pub fn stop_polling(&self) {
		if poll::release_channel(&self.shared, PollState::Idle) {
			info!("Watcher stopped before polling started");
			return;
		}

		if self.shared.control.state() == PollState::Running {
			debug!("Requesting poll worker stop");
		}
		self.shared.control.request_stop();
		self.shared.backend.interrupt();
	}

	/// Waits for the poll worker to exit.
	pub fn join(&self) {
		let Some(handle) = self.worker.lock().take() else {
			return;
		};

		if handle.thread().id() == thread::current().id() {
			// Joining ourselves would never return; the worker is already on its way out
			debug!("Not joining poll worker from inside itself");
			return;
		}

		if handle.join().is_err() {
			error!("Poll worker panicked");
		}
	}

	#[must_use]
	pub fn poll_state(&self) -> PollState {
		self.shared.control.state()
	}

	/// This engine emulates recursion on every backend.
	#[must_use]
	pub const fn supports_recursive_watch(&self) -> bool {
		true
	}

	pub fn subscribe(&self, handler: impl EventHandler) -> SubscriptionId {
		self.shared.observers.subscribe(Arc::new(handler))
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.shared.observers.unsubscribe(id)
	}

	/// Stream of every event emitted from now on, for async consumers.
	pub fn event_stream(&self) -> UnboundedReceiverStream<WatchEvent> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.subscribe(tx);
		UnboundedReceiverStream::new(rx)
	}

	#[must_use]
	pub fn backend(&self) -> &B {
		&self.shared.backend
	}

	#[must_use]
	pub fn config(&self) -> &WatcherConfig {
		&self.shared.config
	}

	/// Only stable while the state lock is held; the channel is released under it.
	fn is_shut_down(&self) -> bool {
		matches!(
			self.shared.control.state(),
			PollState::Draining | PollState::Stopped
		)
	}

	/// A released channel took every kernel registration with it. Call with the state lock held.
	fn deregister_mode(&self) -> Deregister {
		if self.is_shut_down() {
			Deregister::Skip
		} else {
			Deregister::Report
		}
	}

	/// Flushes the events collected under the lock and reports a failure as one more event.
	fn finish(&self, mut outbox: Vec<WatchEvent>, result: Result<()>) -> Result<()> {
		if let Err(e) = &result {
			if matches!(e, Error::Contract(_) | Error::Spawn(_)) {
				error!("{e:#}");
			} else {
				warn!("{e:#}");
			}
			outbox.push(WatchEvent::Error(e.to_string()));
		}

		self.shared.observers.emit(outbox);
		result
	}

	fn remove_all_watches(&self) {
		let mut outbox = Vec::new();
		{
			let mut state = self.shared.state.lock();
			let deregister = self.deregister_mode();
			let paths = state.table.paths().map(Path::to_path_buf).collect::<Vec<_>>();
			for path in paths {
				// Already gone with an ancestor's subtree
				if !state.table.contains_path(&path) {
					continue;
				}
				if let Err(e) =
					state.remove_watch(&self.shared.backend, &path, deregister, &mut outbox)
				{
					warn!("{e:#}");
					outbox.push(WatchEvent::Error(e.to_string()));
				}
			}
		}

		self.shared.observers.emit(outbox);
	}
}

impl<B: Backend> Drop for Watcher<B> {
	fn drop(&mut self) {
		debug!("Dropping watcher");
		self.remove_all_watches();
		self.stop_polling();
		self.join();
	}
}
