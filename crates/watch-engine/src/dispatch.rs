//! Turns raw records into watch events, updating the watch state on the way.

use std::path::{Path, PathBuf};

use tracing::{debug, error, trace, warn};

use crate::{
	backend::Backend,
	error::{ContractViolation, Error},
	event::WatchEvent,
	mask::EventMask,
	record::RawRecord,
	rename::MoveHalf,
	state::{Deregister, WatchState},
};

/// What the poll loop should do after a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
	Continue,
	/// The channel itself is gone; nothing after this record can be resolved.
	ChannelInvalidated,
}

impl WatchState {
	pub(crate) fn dispatch(
		&mut self,
		backend: &impl Backend,
		record: RawRecord,
		outbox: &mut Vec<WatchEvent>,
	) -> Flow {
		let flow = self.dispatch_record(backend, record, outbox);

		let expired = self.renames.advance();
		if expired > 0 {
			trace!(expired, "Rename halves without a sibling expired");
		}

		flow
	}

	fn dispatch_record(
		&mut self,
		backend: &impl Backend,
		record: RawRecord,
		outbox: &mut Vec<WatchEvent>,
	) -> Flow {
		trace!(handle = %record.handle, mask = ?record.mask, cookie = record.cookie, name = ?record.name, "Raw record");

		if record.handle.is_channel() {
			return channel_record(&record, outbox);
		}

		let unknown = record.mask.difference(EventMask::all());
		if !unknown.is_empty() {
			report(
				outbox,
				ContractViolation::UnknownFlags {
					handle: record.handle,
					bits: unknown.bits(),
				}
				.into(),
			);
		}

		let Some(base) = self.table.path(record.handle).map(Path::to_path_buf) else {
			trace!(handle = %record.handle, "Dropping record for a watch that is no longer held");
			return Flow::Continue;
		};

		// When the watched object itself is gone the record can only be about the watch dying
		let base_exists = base.exists();
		let (path, mask) = if base_exists {
			(record.child_of(&base), record.mask)
		} else {
			(base.clone(), record.mask.intersection(EventMask::TERMINAL))
		};

		if mask.is_empty() {
			trace!(path = %base.display(), "Suppressing record for a vanished watch target");
			return Flow::Continue;
		}

		if mask.contains(EventMask::CREATE) {
			self.on_create(backend, &base, path.clone(), outbox);
		}

		if mask.contains(EventMask::DELETE) {
			if mask.contains(EventMask::DELETE_SELF) {
				report(
					outbox,
					ContractViolation::UnknownFlags {
						handle: record.handle,
						bits: (EventMask::DELETE | EventMask::DELETE_SELF).bits(),
					}
					.into(),
				);
			}
			outbox.push(WatchEvent::Deleted(path.clone()));
		} else if mask.contains(EventMask::DELETE_SELF) {
			outbox.push(WatchEvent::Deleted(path.clone()));
			self.drop_watch(backend, &base, outbox);
		}

		if mask.contains(EventMask::MOVE_SELF) {
			if self.relocated.remove(&record.handle) {
				trace!(path = %base.display(), "Watch already follows its moved directory");
			} else {
				outbox.push(WatchEvent::Moved(path.clone()));
				self.drop_watch(backend, &base, outbox);
			}
		}

		if mask.intersects(EventMask::MOVE) {
			if record.cookie == 0 {
				report(outbox, ContractViolation::ZeroCookie(record.handle).into());
			} else {
				let half = if mask.contains(EventMask::MOVED_FROM) {
					MoveHalf::From
				} else {
					MoveHalf::To
				};

				if let Some(rename) =
					self.renames
						.correlate(record.cookie, half, path.clone(), record.handle)
				{
					outbox.push(WatchEvent::MovedTo {
						from: rename.from.clone(),
						to: rename.to.clone(),
					});
					self.follow_rename(backend, &rename.from, &rename.to, outbox);
				}
			}
		}

		if mask.contains(EventMask::MODIFY) {
			outbox.push(WatchEvent::Modified(path));
		}

		if mask.contains(EventMask::IGNORED) && self.table.handle(&base) == Some(record.handle) {
			debug!(path = %base.display(), "Watch invalidated by the kernel");
			self.drop_watch(backend, &base, outbox);
		}

		Flow::Continue
	}

	fn on_create(
		&mut self,
		backend: &impl Backend,
		base: &Path,
		path: PathBuf,
		outbox: &mut Vec<WatchEvent>,
	) {
		if path == base {
			report(outbox, ContractViolation::CreateForSelf(path.into()).into());
			return;
		}

		outbox.push(WatchEvent::Created(path.clone()));

		let Some(parent) = self.tree.node(base) else {
			return;
		};

		let is_dir = path
			.symlink_metadata()
			.is_ok_and(|metadata| metadata.is_dir());
		if !is_dir || self.table.contains_path(&path) {
			return;
		}

		// Registered before the next read so records under the new directory always resolve
		match self.add_watch(backend, path.clone(), true, Some(parent), outbox) {
			Ok(()) => debug!(path = %path.display(), "Extended recursive watch"),
			Err(e) if e.is_race() => {
				debug!(path = %path.display(), "New directory vanished before it could be watched");
			}
			Err(e) => report(outbox, e),
		}
	}

	/// Keeps a directory renamed into a recursive tree watched.
	///
	/// A directory that was already part of a recursive tree keeps its handles, which the kernel
	/// moves along with the inode; only the paths change. A directory arriving from an unwatched
	/// location is registered like a freshly created one.
	fn follow_rename(
		&mut self,
		backend: &impl Backend,
		from: &Path,
		to: &Path,
		outbox: &mut Vec<WatchEvent>,
	) {
		let Some(parent) = to.parent().and_then(|parent| self.tree.node(parent)) else {
			return;
		};

		let is_dir = to
			.symlink_metadata()
			.is_ok_and(|metadata| metadata.is_dir());
		if !is_dir || self.table.contains_path(to) {
			return;
		}

		if let Some(node) = self.tree.node(from) {
			let Some(handle) = self.table.handle(from) else {
				return;
			};

			let moved = self.tree.relocate(node, parent, from, to);
			if moved.is_empty() {
				return;
			}
			for (old, new) in moved {
				self.table.rename(&old, new.clone());
				outbox.push(WatchEvent::WatchRemoved(old));
				outbox.push(WatchEvent::WatchAdded(new));
			}
			self.relocated.insert(handle);
			debug!(from = %from.display(), to = %to.display(), "Recursive watch followed a renamed directory");
			return;
		}

		if self.table.contains_path(from) {
			// A plain watch holds the inode; it ends with its own move record
			return;
		}

		match self.add_watch(backend, to.to_path_buf(), true, Some(parent), outbox) {
			Ok(()) => debug!(path = %to.display(), "Extended recursive watch to a moved-in directory"),
			Err(e) if e.is_race() => {
				debug!(path = %to.display(), "Moved-in directory vanished before it could be watched");
			}
			Err(e) => report(outbox, e),
		}
	}

	/// Tears down a watch that reported its own end; the kernel may already have dropped it.
	fn drop_watch(&mut self, backend: &impl Backend, base: &Path, outbox: &mut Vec<WatchEvent>) {
		if let Err(e) = self.remove_watch(backend, base, Deregister::Swallow, outbox) {
			debug!(path = %base.display(), "Watch already torn down: {e}");
		}
	}
}

fn channel_record(record: &RawRecord, outbox: &mut Vec<WatchEvent>) -> Flow {
	if record.mask.contains(EventMask::Q_OVERFLOW) {
		warn!("Kernel event queue overflowed, events were lost");
		outbox.push(WatchEvent::Error(
			"event queue overflowed; events were lost".to_string(),
		));
		Flow::Continue
	} else {
		error!(mask = ?record.mask, "Notification channel invalidated");
		outbox.push(WatchEvent::Error(Error::ChannelInvalidated.to_string()));
		Flow::ChannelInvalidated
	}
}

fn report(outbox: &mut Vec<WatchEvent>, e: Error) {
	if matches!(e, Error::Contract(_)) {
		error!("{e:#}");
	} else {
		warn!("{e:#}");
	}
	outbox.push(WatchEvent::Error(e.to_string()));
}
