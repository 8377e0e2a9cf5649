//! Watches the paths given on the command line (recursively) and prints every event.
//!
//! `RUST_LOG=sd_watch_engine=trace` shows the raw records; `WATCH_CONFIG=config.json` loads a
//! watcher config instead of the defaults.

use std::env;

use sd_watch_engine::{Backend, RecommendedWatcher, WatchEvent, WatcherConfig};
use tokio_stream::StreamExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let paths = env::args().skip(1).collect::<Vec<_>>();
	if paths.is_empty() {
		eprintln!("usage: watch <path>...");
		return Ok(());
	}

	let config = match env::var_os("WATCH_CONFIG") {
		Some(path) => WatcherConfig::load(path)?,
		None => WatcherConfig::default(),
	};

	let watcher = RecommendedWatcher::open(config)?;
	let mut events = watcher.event_stream();

	for path in &paths {
		watcher.add_watch(path, true)?;
	}
	info!(
		backend = watcher.backend().kind(),
		mask = ?watcher.config().watch_mask,
		watches = watcher.watched_paths().len(),
		"Watching"
	);

	while let Some(event) = events.next().await {
		match event {
			WatchEvent::Error(message) => error!("{message}"),
			WatchEvent::MovedTo { from, to } => {
				println!("moved    {} -> {}", from.display(), to.display());
			}
			event => {
				let kind = match &event {
					WatchEvent::WatchAdded(_) => "watching",
					WatchEvent::WatchRemoved(_) => "dropped",
					WatchEvent::Moved(_) => "moved",
					WatchEvent::Deleted(_) => "deleted",
					WatchEvent::Created(_) => "created",
					_ => "modified",
				};
				if let Some(path) = event.path() {
					println!("{kind:<8} {}", path.display());
				}
			}
		}
	}

	Ok(())
}
