//! Watches the add-ons directory and rescans the registry on changes, so
//! installs and removals are picked up without a restart.
//!
//! `MARQUEE_DEV=1` shortens the debounce interval for add-on development.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::Duration;

use marquee_core::AddonRegistry;
use notify_debouncer_mini::{DebouncedEventKind, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub fn is_dev_mode() -> bool {
    std::env::var("MARQUEE_DEV").map(|v| v == "1").unwrap_or(false)
}

/// Start the filesystem watcher and the rescan task.
pub fn spawn(registry: Arc<AddonRegistry>, root: PathBuf) {
    // A depth-1 signal channel: any queued rescan already covers newer
    // filesystem events.
    let (rescan_tx, mut rescan_rx) = mpsc::channel::<()>(1);

    // notify delivers over a synchronous channel; give it its own thread.
    std::thread::spawn(move || {
        let (tx, rx) = channel();
        let debounce = if is_dev_mode() {
            Duration::from_millis(200)
        } else {
            Duration::from_secs(2)
        };
        let mut debouncer = match new_debouncer(debounce, tx) {
            Ok(d) => d,
            Err(err) => {
                warn!("add-on watcher unavailable: {err}");
                return;
            }
        };
        if let Err(err) = debouncer.watcher().watch(&root, RecursiveMode::Recursive) {
            warn!(path = %root.display(), "cannot watch add-ons directory: {err}");
            return;
        }
        info!(path = %root.display(), "watching for add-on changes");

        for result in rx {
            match result {
                Ok(events) => {
                    if events
                        .iter()
                        .any(|e| matches!(e.kind, DebouncedEventKind::Any))
                    {
                        let _ = rescan_tx.try_send(());
                    }
                }
                Err(err) => warn!("watch error: {err}"),
            }
        }
    });

    tokio::spawn(async move {
        while rescan_rx.recv().await.is_some() {
            match registry.scan().await {
                Ok(ids) => debug!(count = ids.len(), "rescanned after filesystem change"),
                Err(err) => warn!("rescan failed: {err}"),
            }
        }
    });
}
