//! The poll worker: reads raw bytes from the channel and drives the dispatcher.

use std::{
	io,
	sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

use serde::Serialize;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::{
	backend::Backend,
	dispatch::Flow,
	error::{ContractViolation, Error},
	event::WatchEvent,
	record,
	watcher::Shared,
};

/// Lifecycle of the poll worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum PollState {
	/// Channel open, worker not started yet
	Idle = 0,
	Running = 1,
	/// Worker is leaving its loop and releasing the channel
	Draining = 2,
	/// Channel released; terminal
	Stopped = 3,
}

impl PollState {
	const fn from_u8(value: u8) -> Self {
		match value {
			0 => Self::Idle,
			1 => Self::Running,
			2 => Self::Draining,
			_ => Self::Stopped,
		}
	}
}

#[derive(Debug)]
pub(crate) struct PollControl {
	state: AtomicU8,
	stop_requested: AtomicBool,
}

impl Default for PollControl {
	fn default() -> Self {
		Self {
			state: AtomicU8::new(PollState::Idle as u8),
			stop_requested: AtomicBool::new(false),
		}
	}
}

impl PollControl {
	pub(crate) fn state(&self) -> PollState {
		PollState::from_u8(self.state.load(Ordering::Acquire))
	}

	pub(crate) fn transition(&self, from: PollState, to: PollState) -> bool {
		self.state
			.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	fn set(&self, state: PollState) {
		self.state.store(state as u8, Ordering::Release);
	}

	pub(crate) fn request_stop(&self) {
		self.stop_requested.store(true, Ordering::Release);
	}

	fn stop_requested(&self) -> bool {
		self.stop_requested.load(Ordering::Acquire)
	}
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
	Requested,
	TooManyErrors,
	Starved,
	ChannelInvalidated,
}

/// Body of the poll worker thread. Expects the state to already be `Running`.
pub(crate) fn run<B: Backend>(shared: &Shared<B>) {
	let span = info_span!("watch_poll", backend = shared.backend.kind());
	let _enter = span.enter();

	info!("Poll worker started");
	let exit = poll_until_exit(shared);
	info!(?exit, "Poll worker leaving its loop");

	if release_channel(shared, PollState::Running) {
		debug!("Poll worker stopped");
	}
}

fn poll_until_exit<B: Backend>(shared: &Shared<B>) -> Exit {
	let config = &shared.config;
	let backend = &shared.backend;

	let mut errors = 0u32;
	let mut idle_polls = 0u32;
	let mut buffer = Vec::new();

	loop {
		if shared.control.stop_requested() {
			return Exit::Requested;
		}

		let pending = match backend.pending_bytes() {
			Ok(pending) => pending,
			Err(e) => {
				if failed_attempt(shared, &mut errors, e) {
					return Exit::TooManyErrors;
				}
				continue;
			}
		};

		if pending == 0 {
			idle_polls = idle_polls.saturating_add(1);
			if config
				.starvation_limit
				.is_some_and(|limit| idle_polls >= limit)
			{
				let e = Error::Starved { cycles: idle_polls };
				error!("{e:#}");
				shared.observers.emit([WatchEvent::Error(e.to_string())]);
				return Exit::Starved;
			}

			let backoff = config.idle_backoff(idle_polls);
			trace!(?backoff, idle_polls, "Nothing pending, backing off");
			if let Err(e) = backend.wait(backoff) {
				if failed_attempt(shared, &mut errors, e) {
					return Exit::TooManyErrors;
				}
			}
			continue;
		}
		idle_polls = 0;

		buffer.resize(pending, 0);
		let read = match backend.read(&mut buffer) {
			Ok(read) => read,
			// Interrupted before anything was read
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => {
				if failed_attempt(shared, &mut errors, e) {
					return Exit::TooManyErrors;
				}
				continue;
			}
		};

		if read != pending {
			let short = io::Error::new(
				io::ErrorKind::UnexpectedEof,
				ContractViolation::ShortRead { read, pending },
			);
			if failed_attempt(shared, &mut errors, short) {
				return Exit::TooManyErrors;
			}
			continue;
		}
		errors = 0;

		if process_batch(shared, &buffer) == Flow::ChannelInvalidated {
			return Exit::ChannelInvalidated;
		}
	}
}

/// Reports one failed I/O attempt; returns whether the loop must give up.
fn failed_attempt<B: Backend>(shared: &Shared<B>, errors: &mut u32, source: io::Error) -> bool {
	*errors += 1;
	let e = Error::Poll {
		attempt: *errors,
		source,
	};

	let fatal = *errors >= shared.config.max_consecutive_errors;
	if fatal {
		error!("{e:#}; giving up");
	} else {
		warn!("{e:#}");
	}
	shared.observers.emit([WatchEvent::Error(e.to_string())]);

	fatal
}

fn process_batch<B: Backend>(shared: &Shared<B>, buffer: &[u8]) -> Flow {
	trace!(bytes = buffer.len(), "Processing batch");

	for record in record::parse(buffer) {
		let record = match record {
			Ok(record) => record,
			Err(violation) => {
				let e = Error::from(violation);
				error!("{e:#}; discarding rest of batch");
				shared.observers.emit([WatchEvent::Error(e.to_string())]);
				break;
			}
		};

		let mut outbox = Vec::new();
		let flow = shared
			.state
			.lock()
			.dispatch(&shared.backend, record, &mut outbox);

		shared.observers.emit(outbox);

		if flow == Flow::ChannelInvalidated {
			return flow;
		}
	}

	Flow::Continue
}

/// Leaves `from` through `Draining` to `Stopped` and releases the channel. Returns `false` when
/// the worker was not in `from`.
///
/// The watch state lock is held across the switch, so a controller holding it sees either a live
/// channel or a released one.
pub(crate) fn release_channel<B: Backend>(shared: &Shared<B>, from: PollState) -> bool {
	let closed = {
		let _state = shared.state.lock();
		if !shared.control.transition(from, PollState::Draining) {
			return false;
		}
		let closed = shared.backend.close();
		shared.control.set(PollState::Stopped);
		closed
	};

	if let Err(e) = closed {
		let message = format!("unable to release notification channel: {e}");
		error!("{message}");
		shared.observers.emit([WatchEvent::Error(message)]);
	}

	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn transitions_only_from_expected_state() {
		let control = PollControl::default();
		assert_eq!(control.state(), PollState::Idle);

		assert!(control.transition(PollState::Idle, PollState::Running));
		assert!(!control.transition(PollState::Idle, PollState::Running));
		assert_eq!(control.state(), PollState::Running);

		control.set(PollState::Stopped);
		assert!(!control.transition(PollState::Running, PollState::Draining));
	}
}
