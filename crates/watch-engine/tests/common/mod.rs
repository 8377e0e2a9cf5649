#![allow(dead_code)]

use std::{
	sync::mpsc::{self, Receiver, RecvTimeoutError},
	time::{Duration, Instant},
};

use sd_watch_engine::{Backend, WatchEvent, Watcher, WatcherConfig};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Short backoff so idle polls don't slow the suite down.
pub fn fast_config() -> WatcherConfig {
	WatcherConfig {
		idle_backoff_ms: 5,
		max_idle_backoff_ms: 20,
		..Default::default()
	}
}

/// Everything a watcher emitted, in order.
pub struct EventLog {
	rx: Receiver<WatchEvent>,
}

impl EventLog {
	pub fn attach<B: Backend>(watcher: &Watcher<B>) -> Self {
		let (tx, rx) = mpsc::channel();
		watcher.subscribe(tx);
		Self { rx }
	}

	/// Collects events up to and including the first one matching `pred`.
	pub fn until(&self, mut pred: impl FnMut(&WatchEvent) -> bool) -> Vec<WatchEvent> {
		let deadline = Instant::now() + TIMEOUT;
		let mut seen = Vec::new();

		loop {
			let left = deadline.saturating_duration_since(Instant::now());
			match self.rx.recv_timeout(left) {
				Ok(event) => {
					let done = pred(&event);
					seen.push(event);
					if done {
						return seen;
					}
				}
				Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
					panic!("expected event never arrived, saw: {seen:#?}")
				}
			}
		}
	}

	pub fn until_event(&self, expected: &WatchEvent) -> Vec<WatchEvent> {
		self.until(|event| event == expected)
	}

	/// Events already delivered, without waiting.
	pub fn drain(&self) -> Vec<WatchEvent> {
		self.rx.try_iter().collect()
	}
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
	let deadline = Instant::now() + TIMEOUT;
	while !condition() {
		assert!(Instant::now() < deadline, "condition not reached in time");
		std::thread::sleep(Duration::from_millis(5));
	}
}
