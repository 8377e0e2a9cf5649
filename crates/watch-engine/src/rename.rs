use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use crate::backend::WatchHandle;

/// Later records an unpaired half survives while waiting for its sibling. The kernel queues both
/// halves of one rename back to back.
const PAIR_WINDOW: u64 = 1;

/// Which half of a rename pair a record carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveHalf {
	From,
	To,
}

#[derive(Debug)]
struct Pending {
	path: PathBuf,
	half: MoveHalf,
	handle: WatchHandle,
	arrived: u64,
}

/// A completed rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
	pub from: PathBuf,
	pub to: PathBuf,
}

/// Pairs moved-from and moved-to records by their cookie.
#[derive(Debug, Default)]
pub struct RenameCorrelator {
	pending: HashMap<u32, Pending>,
	sequence: u64,
}

impl RenameCorrelator {
	/// Marks the end of one dispatched record and forgets halves whose sibling can no longer
	/// arrive, such as a file moved out of every watch. Returns how many were dropped.
	pub fn advance(&mut self) -> usize {
		self.sequence = self.sequence.wrapping_add(1);
		let sequence = self.sequence;

		let before = self.pending.len();
		self.pending
			.retain(|_, pending| sequence.wrapping_sub(pending.arrived) <= PAIR_WINDOW);
		before - self.pending.len()
	}

	/// Feeds one half. Returns the rename once its sibling half has been seen.
	///
	/// The destination is whichever of the two paths currently exists on disk; when both or
	/// neither exist the record flags decide.
	pub fn correlate(
		&mut self,
		cookie: u32,
		half: MoveHalf,
		path: PathBuf,
		handle: WatchHandle,
	) -> Option<Rename> {
		let Some(sibling) = self.pending.remove(&cookie) else {
			self.pending.insert(
				cookie,
				Pending {
					path,
					half,
					handle,
					arrived: self.sequence,
				},
			);
			return None;
		};

		let (by_flags_from, by_flags_to) = match (sibling.half, half) {
			(MoveHalf::From, _) | (MoveHalf::To, MoveHalf::To) => (sibling.path, path),
			(MoveHalf::To, MoveHalf::From) => (path, sibling.path),
		};

		Some(match (exists(&by_flags_from), exists(&by_flags_to)) {
			(true, false) => Rename {
				from: by_flags_to,
				to: by_flags_from,
			},
			_ => Rename {
				from: by_flags_from,
				to: by_flags_to,
			},
		})
	}

	/// Drops every unresolved half that was delivered on `handle`.
	pub fn discard(&mut self, handle: WatchHandle) -> usize {
		let before = self.pending.len();
		self.pending.retain(|_, pending| pending.handle != handle);
		before - self.pending.len()
	}

	#[must_use]
	pub fn pending(&self) -> usize {
		self.pending.len()
	}
}

fn exists(path: &Path) -> bool {
	path.symlink_metadata().is_ok()
}

#[cfg(test)]
mod tests {
	use std::fs;

	use tempfile::tempdir;

	use super::*;

	const WD: WatchHandle = WatchHandle::new(1);

	#[test]
	fn pairs_halves_in_either_order() {
		let dir = tempdir().unwrap();
		let old = dir.path().join("old.txt");
		let new = dir.path().join("new.txt");
		fs::write(&new, b"moved").unwrap();

		let mut correlator = RenameCorrelator::default();
		assert_eq!(correlator.correlate(9, MoveHalf::From, old.clone(), WD), None);
		assert_eq!(
			correlator.correlate(9, MoveHalf::To, new.clone(), WD),
			Some(Rename {
				from: old.clone(),
				to: new.clone()
			})
		);
		assert_eq!(correlator.pending(), 0);

		assert_eq!(correlator.correlate(10, MoveHalf::To, new.clone(), WD), None);
		assert_eq!(
			correlator.correlate(10, MoveHalf::From, old.clone(), WD),
			Some(Rename { from: old, to: new })
		);
	}

	#[test]
	fn existing_path_wins_over_flags() {
		let dir = tempdir().unwrap();
		let present = dir.path().join("present");
		let gone = dir.path().join("gone");
		fs::write(&present, b"").unwrap();

		let mut correlator = RenameCorrelator::default();
		correlator.correlate(3, MoveHalf::From, present.clone(), WD);
		assert_eq!(
			correlator.correlate(3, MoveHalf::To, gone.clone(), WD),
			Some(Rename {
				from: gone,
				to: present
			})
		);
	}

	#[test]
	fn discard_drops_only_halves_of_that_handle() {
		let mut correlator = RenameCorrelator::default();
		correlator.correlate(1, MoveHalf::From, PathBuf::from("/a/x"), WatchHandle::new(1));
		correlator.correlate(2, MoveHalf::From, PathBuf::from("/b/y"), WatchHandle::new(2));

		assert_eq!(correlator.discard(WatchHandle::new(1)), 1);
		assert_eq!(correlator.pending(), 1);
		assert_eq!(
			correlator.correlate(1, MoveHalf::To, PathBuf::from("/a/z"), WatchHandle::new(1)),
			None,
			"a discarded half must not resolve later"
		);
	}

	#[test]
	fn orphaned_halves_expire_while_their_watch_lives() {
		let mut correlator = RenameCorrelator::default();

		for cookie in 1..=1000 {
			correlator.correlate(cookie, MoveHalf::From, PathBuf::from("/w/gone"), WD);
			correlator.advance();
		}
		assert_eq!(correlator.pending(), 1);

		assert_eq!(correlator.advance(), 1);
		assert_eq!(correlator.pending(), 0);
	}

	#[test]
	fn only_the_next_record_can_complete_a_pair() {
		let mut correlator = RenameCorrelator::default();

		correlator.correlate(4, MoveHalf::From, PathBuf::from("/w/a"), WD);
		correlator.advance();
		assert!(correlator
			.correlate(4, MoveHalf::To, PathBuf::from("/w/b"), WD)
			.is_some());
		correlator.advance();

		correlator.correlate(5, MoveHalf::From, PathBuf::from("/w/c"), WD);
		correlator.advance();
		correlator.advance();
		assert_eq!(
			correlator.correlate(5, MoveHalf::To, PathBuf::from("/w/d"), WD),
			None,
			"a stale cookie must not pair with a later record"
		);
	}
}
