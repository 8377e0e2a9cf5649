//! Path normalization used as the key of every watch.

use std::{
	env,
	path::{Component, Path, PathBuf},
};

/// Normalizes a path into the absolute form stored in the watch table.
///
/// Relative paths are anchored at the current working directory, `.` components and trailing
/// separators are dropped and `..` is resolved lexically. Symlinks are left alone, so the
/// target does not need to exist.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
	let anchored = if path.is_absolute() {
		path.to_path_buf()
	} else {
		env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
	};

	let mut normalized = PathBuf::new();
	for component in anchored.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				normalized.pop();
			}
			other => normalized.push(other),
		}
	}

	normalized
}

/// Lookup key for an already normalized path; folds case only on case-insensitive filesystems.
#[must_use]
pub fn fold(path: &Path, case_insensitive: bool) -> PathBuf {
	if case_insensitive {
		PathBuf::from(path.to_string_lossy().to_lowercase())
	} else {
		path.to_path_buf()
	}
}
