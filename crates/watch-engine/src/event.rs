//! Platform-neutral events and the observers that receive them.

use std::{
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicU64, Ordering},
		mpsc, Arc,
	},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc as async_mpsc};
use tracing::trace;

/// Event emitted by a [`Watcher`](crate::Watcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEvent {
	Error(String),
	WatchAdded(PathBuf),
	WatchRemoved(PathBuf),
	/// The watched object itself moved away; its destination is unknown
	Moved(PathBuf),
	/// A rename whose both halves were seen
	MovedTo { from: PathBuf, to: PathBuf },
	Deleted(PathBuf),
	Created(PathBuf),
	Modified(PathBuf),
}

impl WatchEvent {
	/// Primary path of the event, `None` for errors.
	#[must_use]
	pub fn path(&self) -> Option<&Path> {
		match self {
			Self::Error(_) => None,
			Self::WatchAdded(path)
			| Self::WatchRemoved(path)
			| Self::Moved(path)
			| Self::Deleted(path)
			| Self::Created(path)
			| Self::Modified(path) => Some(path),
			Self::MovedTo { to, .. } => Some(to),
		}
	}

	#[must_use]
	pub const fn is_error(&self) -> bool {
		matches!(self, Self::Error(_))
	}
}

/// Receives events from a watcher.
///
/// Handlers are called without any watcher lock held, so they may call back into the watcher
/// (for example to remove a watch from inside a `Deleted` handler).
pub trait EventHandler: Send + Sync + 'static {
	fn handle_event(&self, event: &WatchEvent);
}

impl<F> EventHandler for F
where
	F: Fn(&WatchEvent) + Send + Sync + 'static,
{
	fn handle_event(&self, event: &WatchEvent) {
		self(event);
	}
}

impl EventHandler for mpsc::Sender<WatchEvent> {
	fn handle_event(&self, event: &WatchEvent) {
		if self.send(event.clone()).is_err() {
			trace!("Event receiver dropped");
		}
	}
}

impl EventHandler for async_mpsc::UnboundedSender<WatchEvent> {
	fn handle_event(&self, event: &WatchEvent) {
		if self.send(event.clone()).is_err() {
			trace!("Event receiver dropped");
		}
	}
}

impl EventHandler for broadcast::Sender<WatchEvent> {
	fn handle_event(&self, event: &WatchEvent) {
		// No subscribers right now is not an error for a broadcast channel
		let _ = self.send(event.clone());
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registered observers.
#[derive(Default)]
pub(crate) struct Observers {
	handlers: RwLock<Vec<(SubscriptionId, Arc<dyn EventHandler>)>>,
	next_id: AtomicU64,
}

impl Observers {
	pub(crate) fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.handlers.write().push((id, handler));
		id
	}

	pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut handlers = self.handlers.write();
		let before = handlers.len();
		handlers.retain(|(existing, _)| *existing != id);
		before != handlers.len()
	}

	/// Delivers events in order to every observer registered at the time of the call.
	///
	/// The handler list is snapshotted first so handlers may subscribe or unsubscribe re-entrantly.
	pub(crate) fn emit(&self, events: impl IntoIterator<Item = WatchEvent>) {
		let handlers = self
			.handlers
			.read()
			.iter()
			.map(|(_, handler)| Arc::clone(handler))
			.collect::<Vec<_>>();

		for event in events {
			trace!(?event, "Emitting event");
			for handler in &handlers {
				handler.handle_event(&event);
			}
		}
	}
}
