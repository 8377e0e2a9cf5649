use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
	/// Event bits carried by a raw record and requested when registering a watch.
	///
	/// The values are the kernel inotify values, which is the record format every backend emits.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
	pub struct EventMask: u32 {
		const ACCESS = 0x0000_0001;
		const MODIFY = 0x0000_0002;
		const ATTRIB = 0x0000_0004;
		const CLOSE_WRITE = 0x0000_0008;
		const CLOSE_NOWRITE = 0x0000_0010;
		const OPEN = 0x0000_0020;
		const MOVED_FROM = 0x0000_0040;
		const MOVED_TO = 0x0000_0080;
		const CREATE = 0x0000_0100;
		const DELETE = 0x0000_0200;
		const DELETE_SELF = 0x0000_0400;
		const MOVE_SELF = 0x0000_0800;
		/// Filesystem holding the watched object was unmounted
		const UNMOUNT = 0x0000_2000;
		/// Kernel event queue overflowed, events were lost
		const Q_OVERFLOW = 0x0000_4000;
		/// Watch was invalidated (removed explicitly or implicitly)
		const IGNORED = 0x0000_8000;
		/// Subject of the event is a directory
		const ISDIR = 0x4000_0000;
	}
}

impl EventMask {
	/// Both halves of a rename pair.
	pub const MOVE: Self = Self::MOVED_FROM.union(Self::MOVED_TO);

	/// Notifications through which a watch reports its own end.
	pub const TERMINAL: Self = Self::DELETE_SELF
		.union(Self::MOVE_SELF)
		.union(Self::IGNORED);

	/// The mask registered for every watch unless configured otherwise.
	#[must_use]
	pub const fn default_watch() -> Self {
		Self::CREATE
			.union(Self::DELETE)
			.union(Self::DELETE_SELF)
			.union(Self::MOVED_FROM)
			.union(Self::MOVED_TO)
			.union(Self::MOVE_SELF)
			.union(Self::MODIFY)
	}
}

impl Default for EventMask {
	fn default() -> Self {
		Self::default_watch()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_bits_are_detectable() {
		let mask = EventMask::from_bits_retain(0x0100_0000 | EventMask::CREATE.bits());
		assert!(mask.contains(EventMask::CREATE));
		assert_eq!(
			mask.difference(EventMask::all()).bits(),
			0x0100_0000,
			"bits outside the known set survive decoding"
		);
	}

	#[test]
	fn default_watch_mask_matches_controller_needs() {
		let mask = EventMask::default();
		assert!(mask.contains(EventMask::MOVE));
		assert!(mask.contains(EventMask::DELETE_SELF | EventMask::MOVE_SELF));
		assert!(!mask.contains(EventMask::ACCESS));
	}

	#[cfg(any(target_os = "linux", target_os = "android"))]
	#[test]
	fn values_match_the_kernel() {
		assert_eq!(EventMask::CREATE.bits(), libc::IN_CREATE);
		assert_eq!(EventMask::DELETE_SELF.bits(), libc::IN_DELETE_SELF);
		assert_eq!(EventMask::MOVE_SELF.bits(), libc::IN_MOVE_SELF);
		assert_eq!(EventMask::MOVED_FROM.bits(), libc::IN_MOVED_FROM);
		assert_eq!(EventMask::MOVED_TO.bits(), libc::IN_MOVED_TO);
		assert_eq!(EventMask::Q_OVERFLOW.bits(), libc::IN_Q_OVERFLOW);
		assert_eq!(EventMask::IGNORED.bits(), libc::IN_IGNORED);
		assert_eq!(EventMask::ISDIR.bits(), libc::IN_ISDIR);
	}
}
