//! Watch bookkeeping shared by the controller and the poll worker.
//!
//! Everything here runs with the watcher lock held and never calls observers; events are
//! collected into an outbox that the caller flushes once the lock is released.

use std::{
	collections::HashSet,
	fs, io,
	path::{Path, PathBuf},
};

use tracing::{debug, trace, warn};

use crate::{
	backend::{Backend, WatchHandle},
	error::{is_vanished, Error, FileIOError, Result},
	event::WatchEvent,
	mask::EventMask,
	rename::RenameCorrelator,
	table::WatchTable,
	tree::{NodeId, RecursiveWatchTree},
};

#[derive(Debug)]
pub(crate) struct WatchState {
	pub(crate) table: WatchTable,
	pub(crate) tree: RecursiveWatchTree,
	pub(crate) renames: RenameCorrelator,
	/// Handles whose directory was renamed inside a recursive tree and whose own move record is
	/// still to come.
	pub(crate) relocated: HashSet<WatchHandle>,
	mask: EventMask,
}

/// How to treat the kernel side when tearing a watch down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deregister {
	/// Deregister every handle; vanished targets are swallowed, anything else is reported.
	Report,
	/// The watch died on its own; every deregistration failure is expected.
	Swallow,
	/// The channel is gone and took every handle with it.
	Skip,
}

impl WatchState {
	pub(crate) fn new(mask: EventMask, case_insensitive: bool) -> Self {
		Self {
			table: WatchTable::new(case_insensitive),
			tree: RecursiveWatchTree::new(case_insensitive),
			renames: RenameCorrelator::default(),
			relocated: HashSet::new(),
			mask,
		}
	}

	/// Registers `path` (already normalized) and, when `recursive`, every directory below it.
	///
	/// Either the whole registration succeeds or nothing is left behind. Subdirectories that
	/// vanish while being enumerated are skipped silently and unreadable ones are skipped with an
	/// error event.
	pub(crate) fn add_watch(
		&mut self,
		backend: &impl Backend,
		path: PathBuf,
		recursive: bool,
		parent: Option<NodeId>,
		outbox: &mut Vec<WatchEvent>,
	) -> Result<()> {
		let mut added = Vec::new();
		let mut skipped = Vec::new();

		match self.register(backend, path, recursive, parent, &mut added, &mut skipped) {
			Ok(()) => {
				outbox.extend(skipped);
				outbox.extend(added.into_iter().map(|(_, path)| WatchEvent::WatchAdded(path)));
				Ok(())
			}
			Err(e) => {
				self.roll_back(backend, added);
				Err(e)
			}
		}
	}

	fn register(
		&mut self,
		backend: &impl Backend,
		path: PathBuf,
		recursive: bool,
		parent: Option<NodeId>,
		added: &mut Vec<(WatchHandle, PathBuf)>,
		skipped: &mut Vec<WatchEvent>,
	) -> Result<()> {
		if self.table.contains_path(&path) {
			return Err(Error::AlreadyWatched(path.into()));
		}

		let metadata = fs::metadata(&path).map_err(|e| {
			if e.kind() == io::ErrorKind::NotFound {
				Error::PathNotFound(path.as_path().into())
			} else {
				FileIOError::from_std_io_err_with_msg(&path, e, "reading metadata").into()
			}
		})?;

		let handle = backend
			.register(&path, self.mask)
			.map_err(|e| FileIOError::from_std_io_err_with_msg(&path, e, "registering watch"))?;

		// The kernel hands back an existing handle when the same inode is reachable through
		// another watched path; that registration belongs to the other entry.
		self.table.insert(handle, path.clone())?;
		added.push((handle, path.clone()));
		trace!(%handle, path = %path.display(), "Registered watch");

		if !(recursive && metadata.is_dir()) {
			return Ok(());
		}

		let node = self.tree.insert(path.clone());
		if let Some(parent) = parent {
			self.tree.add_child(parent, node)?;
		}

		for child in subdirectories(&path)? {
			if self.table.contains_path(&child) {
				debug!(path = %child.display(), "Subdirectory already has its own watch, not linking it");
				continue;
			}

			match self.register(backend, child.clone(), true, Some(node), added, skipped) {
				Ok(()) => {}
				Err(e) if e.is_race() => {
					debug!(path = %child.display(), "Subdirectory vanished while adding recursive watch");
				}
				Err(Error::FileIO(e)) if e.source.kind() == io::ErrorKind::PermissionDenied => {
					warn!(path = %child.display(), "Skipping unreadable subdirectory: {e}");
					skipped.push(WatchEvent::Error(e.to_string()));
				}
				Err(e) => return Err(e),
			}
		}

		Ok(())
	}

	fn roll_back(&mut self, backend: &impl Backend, added: Vec<(WatchHandle, PathBuf)>) {
		for (handle, path) in added.into_iter().rev() {
			debug!(path = %path.display(), "Rolling back watch");
			if let Err(e) = backend.deregister(handle) {
				debug!(%handle, "Failed to deregister watch during rollback: {e}");
			}
			self.table.remove_handle(handle);
			self.renames.discard(handle);
			self.relocated.remove(&handle);
			if let Some(node) = self.tree.node(&path) {
				self.tree.remove(node);
			}
		}
	}

	/// Removes the watch on `path` together with its recursive subtree, deepest entries first.
	///
	/// Local state is always cleared; an `Err` reports a kernel-side deregistration failure.
	pub(crate) fn remove_watch(
		&mut self,
		backend: &impl Backend,
		path: &Path,
		deregister: Deregister,
		outbox: &mut Vec<WatchEvent>,
	) -> Result<()> {
		if !self.table.contains_path(path) {
			return Err(Error::NotWatched(path.into()));
		}

		let paths = match self.tree.node(path) {
			Some(node) => self.tree.remove(node),
			None => vec![path.to_path_buf()],
		};

		let mut failure = None;
		for path in paths {
			let Some(handle) = self.table.remove_path(&path) else {
				continue;
			};

			self.relocated.remove(&handle);
			let dropped = self.renames.discard(handle);
			if dropped > 0 {
				trace!(%handle, dropped, "Discarded unresolved rename halves");
			}

			if deregister != Deregister::Skip {
				match backend.deregister(handle) {
					Ok(()) => {}
					Err(e) if deregister == Deregister::Swallow || is_vanished(&e) => {
						debug!(%handle, path = %path.display(), "Watch already gone: {e}");
					}
					Err(e) => {
						let e = FileIOError::from_std_io_err_with_msg(&path, e, "removing watch");
						// The first failure is handed back to the caller, later ones only become events
						if failure.is_none() {
							failure = Some(e);
						} else {
							warn!("{e:#}");
							outbox.push(WatchEvent::Error(e.to_string()));
						}
					}
				}
			}

			outbox.push(WatchEvent::WatchRemoved(path));
		}

		failure.map_or(Ok(()), |e| Err(e.into()))
	}
}

/// Immediate subdirectories of `dir`; symlinks are not followed so recursion cannot loop.
fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
	let entries = match fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
		Err(e) => {
			return Err(FileIOError::from_std_io_err_with_msg(dir, e, "listing directory").into())
		}
	};

	Ok(entries
		.filter_map(|entry| {
			let entry = entry.ok()?;
			entry
				.file_type()
				.ok()?
				.is_dir()
				.then(|| entry.path())
		})
		.collect())
}
