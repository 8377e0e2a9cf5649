use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use crate::{backend::WatchHandle, error::ContractViolation, path::fold};

/// Bidirectional map between kernel watch handles and the paths they watch.
///
/// Every handle maps to exactly one path and every path to at most one handle.
#[derive(Debug, Default)]
pub struct WatchTable {
	paths: HashMap<WatchHandle, PathBuf>,
	handles: HashMap<PathBuf, WatchHandle>,
	case_insensitive: bool,
}

impl WatchTable {
	#[must_use]
	pub fn new(case_insensitive: bool) -> Self {
		Self {
			case_insensitive,
			..Default::default()
		}
	}

	/// Records a freshly registered watch. The caller must have checked the path is not watched.
	pub fn insert(&mut self, handle: WatchHandle, path: PathBuf) -> Result<(), ContractViolation> {
		if self.paths.contains_key(&handle) {
			return Err(ContractViolation::DuplicateHandle(handle));
		}

		self.handles.insert(self.key(&path), handle);
		self.paths.insert(handle, path);

		Ok(())
	}

	pub fn remove_path(&mut self, path: &Path) -> Option<WatchHandle> {
		let handle = self.handles.remove(&self.key(path))?;
		self.paths.remove(&handle);
		Some(handle)
	}

	pub fn remove_handle(&mut self, handle: WatchHandle) -> Option<PathBuf> {
		let path = self.paths.remove(&handle)?;
		self.handles.remove(&self.key(&path));
		Some(path)
	}

	/// Points the watch on `from` at `to`, keeping its handle.
	pub fn rename(&mut self, from: &Path, to: PathBuf) -> Option<WatchHandle> {
		let handle = self.handles.remove(&self.key(from))?;
		self.handles.insert(self.key(&to), handle);
		self.paths.insert(handle, to);
		Some(handle)
	}

	#[must_use]
	pub fn path(&self, handle: WatchHandle) -> Option<&Path> {
		self.paths.get(&handle).map(PathBuf::as_path)
	}

	#[must_use]
	pub fn handle(&self, path: &Path) -> Option<WatchHandle> {
		self.handles.get(&self.key(path)).copied()
	}

	#[must_use]
	pub fn contains_path(&self, path: &Path) -> bool {
		self.handles.contains_key(&self.key(path))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.paths.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.paths.is_empty()
	}

	pub fn paths(&self) -> impl Iterator<Item = &Path> {
		self.paths.values().map(PathBuf::as_path)
	}

	fn key(&self, path: &Path) -> PathBuf {
		fold(path, self.case_insensitive)
	}
}
