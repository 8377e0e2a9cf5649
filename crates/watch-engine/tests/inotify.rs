#![cfg(any(target_os = "linux", target_os = "android"))]

use std::fs;

use sd_watch_engine::{path::normalize, PollState, RecommendedWatcher, WatchEvent};
use tempfile::tempdir;
use tracing_test::traced_test;

mod common;

use common::{fast_config, wait_until, EventLog};

#[test]
#[traced_test]
fn reports_changes_in_a_recursive_tree() {
	let dir = tempdir().unwrap();
	let root = normalize(dir.path());
	fs::create_dir(root.join("existing")).unwrap();

	let watcher = RecommendedWatcher::open(fast_config()).unwrap();
	let events = EventLog::attach(&watcher);
	watcher.add_watch(&root, true).unwrap();
	assert!(watcher.has_watch(root.join("existing")));

	fs::create_dir(root.join("fresh")).unwrap();
	events.until_event(&WatchEvent::WatchAdded(root.join("fresh")));
	assert!(watcher.has_watch(root.join("fresh")));

	fs::write(root.join("fresh/inside.txt"), b"hello").unwrap();
	events.until_event(&WatchEvent::Created(root.join("fresh/inside.txt")));

	fs::write(root.join("existing/log.txt"), b"one").unwrap();
	fs::write(root.join("existing/log.txt"), b"two").unwrap();
	events.until_event(&WatchEvent::Modified(root.join("existing/log.txt")));
}

#[test]
#[traced_test]
fn pairs_renames() {
	let dir = tempdir().unwrap();
	let root = normalize(dir.path());
	fs::write(root.join("draft.txt"), b"text").unwrap();

	let watcher = RecommendedWatcher::open(fast_config()).unwrap();
	let events = EventLog::attach(&watcher);
	watcher.add_watch(&root, false).unwrap();

	fs::rename(root.join("draft.txt"), root.join("final.txt")).unwrap();
	events.until_event(&WatchEvent::MovedTo {
		from: root.join("draft.txt"),
		to: root.join("final.txt"),
	});
}

#[test]
#[traced_test]
fn renamed_directory_stays_watched() {
	let dir = tempdir().unwrap();
	let root = normalize(dir.path());
	fs::create_dir_all(root.join("before/nested")).unwrap();

	let watcher = RecommendedWatcher::open(fast_config()).unwrap();
	let events = EventLog::attach(&watcher);
	watcher.add_watch(&root, true).unwrap();

	fs::rename(root.join("before"), root.join("after")).unwrap();
	events.until_event(&WatchEvent::WatchAdded(root.join("after/nested")));
	assert!(watcher.has_watch(root.join("after")));
	assert!(!watcher.has_watch(root.join("before")));

	fs::write(root.join("after/nested/inside.txt"), b"hello").unwrap();
	events.until_event(&WatchEvent::Created(root.join("after/nested/inside.txt")));
	assert!(watcher.has_watch(root.join("after")));
}

#[test]
#[traced_test]
fn deleted_subdirectory_loses_its_watch() {
	let dir = tempdir().unwrap();
	let root = normalize(dir.path());
	let doomed = root.join("doomed");
	fs::create_dir(&doomed).unwrap();

	let watcher = RecommendedWatcher::open(fast_config()).unwrap();
	let events = EventLog::attach(&watcher);
	watcher.add_watch(&root, true).unwrap();

	fs::remove_dir(&doomed).unwrap();
	events.until_event(&WatchEvent::WatchRemoved(doomed.clone()));
	assert!(!watcher.has_watch(&doomed));
	assert!(watcher.has_watch(&root));
}

#[test]
#[traced_test]
fn stop_unblocks_the_worker() {
	let watcher = RecommendedWatcher::open(fast_config()).unwrap();
	assert_eq!(watcher.poll_state(), PollState::Running);

	watcher.stop_polling();
	watcher.join();
	wait_until(|| watcher.poll_state() == PollState::Stopped);
}
