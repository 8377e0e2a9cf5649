use std::{fmt::Display, io, path::Path};

use thiserror::Error;

use crate::backend::WatchHandle;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("notification channel unavailable: {0}")]
	ChannelUnavailable(#[source] io::Error),
	#[error("path for watch cannot be empty")]
	EmptyPath,
	#[error("cannot set a watch for a non-existent path: <path='{}'>", .0.display())]
	PathNotFound(Box<Path>),
	#[error("path is already watched: <path='{}'>", .0.display())]
	AlreadyWatched(Box<Path>),
	#[error("attempting to remove a path for which there is no watch: <path='{}'>", .0.display())]
	NotWatched(Box<Path>),
	#[error("trouble polling notification channel (attempt {attempt}): {source}")]
	Poll {
		attempt: u32,
		#[source]
		source: io::Error,
	},
	#[error("no data from notification channel after {cycles} backoff cycles")]
	Starved { cycles: u32 },
	#[error("notification channel was invalidated by the kernel")]
	ChannelInvalidated,
	#[error("failed to spawn poll worker: {0}")]
	Spawn(#[source] io::Error),
	#[error("poll worker already started")]
	AlreadyStarted,
	#[error("poll worker has stopped")]
	Stopped,
	#[error("backend contract violation: {0}")]
	Contract(#[from] ContractViolation),
	#[error("failed to load watcher config: {0}")]
	Config(#[from] serde_json::Error),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

impl Error {
	/// Errors produced by the filesystem changing under us; these are expected and swallowed.
	#[must_use]
	pub fn is_race(&self) -> bool {
		match self {
			Self::FileIO(e) => is_vanished(&e.source),
			Self::PathNotFound(_) => true,
			_ => false,
		}
	}
}

/// Invariant breaks that indicate a bug on the backend side.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractViolation {
	#[error("handle {0} is already assigned to another path")]
	DuplicateHandle(WatchHandle),
	#[error("move record for handle {0} carries a zero cookie")]
	ZeroCookie(WatchHandle),
	#[error("record at offset {offset} overruns the {len} byte buffer")]
	TruncatedRecord { offset: usize, len: usize },
	#[error("record for handle {handle} carries unknown flag pattern {bits:#x}")]
	UnknownFlags { handle: WatchHandle, bits: u32 },
	#[error("node for <path='{}'> already has a different parent", .0.display())]
	ForeignParent(Box<Path>),
	#[error("got a create record for the watched directory itself: <path='{}'>", .0.display())]
	CreateForSelf(Box<Path>),
	#[error("read returned {read} bytes while {pending} were pending")]
	ShortRead { read: usize, pending: usize },
}

/// File I/O error that includes the path that caused the error
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<&'static str>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl FileIOError {
	pub fn from_std_io_err_with_msg(
		path: impl AsRef<Path>,
		source: io::Error,
		msg: &'static str,
	) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(msg),
		}
	}
}

/// The target disappeared (ENOENT) or the kernel already dropped the handle (EINVAL).
pub(crate) fn is_vanished(e: &io::Error) -> bool {
	e.kind() == io::ErrorKind::NotFound || e.kind() == io::ErrorKind::InvalidInput
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vanished_targets_are_races() {
		let gone = Error::from(FileIOError::from_std_io_err_with_msg(
			"/tmp/gone",
			io::Error::from(io::ErrorKind::NotFound),
			"reading metadata",
		));
		assert!(gone.is_race());

		let denied = Error::from(FileIOError::from_std_io_err_with_msg(
			"/root/secret",
			io::Error::from(io::ErrorKind::PermissionDenied),
			"registering watch",
		));
		assert!(!denied.is_race());
		assert!(!Error::EmptyPath.is_race());
	}

	#[test]
	fn file_io_error_mentions_path_and_context() {
		let e = FileIOError::from_std_io_err_with_msg(
			"/srv/data",
			io::Error::from(io::ErrorKind::PermissionDenied),
			"registering watch",
		);
		let message = e.to_string();
		assert!(message.contains("(registering watch)"));
		assert!(message.contains("/srv/data"));
	}
}
