//! marquee host daemon.
//!
//! Discovers installed add-on packages, keeps the registry in sync with the
//! filesystem and drains add-on status events. Host subsystems embed
//! `marquee-core` directly; this binary is the standalone supervisor.

mod watcher;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use marquee_core::{AddonRegistry, AddonStatus, SettingsStore, StatusReporter};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn addons_root() -> anyhow::Result<PathBuf> {
    if let Some(dir) = env::var_os("MARQUEE_ADDONS_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("could not find home directory")?;
    Ok(home.join(".marquee").join("addons"))
}

fn settings_store() -> anyhow::Result<SettingsStore> {
    match env::var_os("MARQUEE_DATA_DIR") {
        Some(dir) => Ok(SettingsStore::new(PathBuf::from(dir))?),
        None => Ok(SettingsStore::with_default_dir()?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let root = addons_root()?;
    let (reporter, mut status_rx) = StatusReporter::channel(64);
    let registry = Arc::new(AddonRegistry::new(&root, settings_store()?, reporter)?);

    let ids = registry.scan().await.context("initial add-on scan")?;
    info!(count = ids.len(), addons = ?ids, "add-ons discovered");

    // Drain status events. A restart request disables the entry; because
    // the registry only holds the library weakly, re-enabling makes the
    // next acquisition load it fresh.
    let drain_registry = registry.clone();
    tokio::spawn(async move {
        while let Some(event) = status_rx.recv().await {
            match event.status {
                AddonStatus::NeedRestart => {
                    warn!(
                        addon = %event.addon_id, detail = %event.detail,
                        "add-on requests a restart, disabling until re-enabled"
                    );
                    if let Err(err) = drain_registry.set_enabled(&event.addon_id, false).await {
                        warn!(addon = %event.addon_id, "could not disable: {err}");
                    }
                }
                AddonStatus::NeedSettings => {
                    warn!(
                        addon = %event.addon_id, detail = %event.detail,
                        "add-on needs configuration"
                    );
                }
                AddonStatus::PermanentFailure => {
                    warn!(
                        addon = %event.addon_id, detail = %event.detail,
                        "add-on failed permanently"
                    );
                }
                status => {
                    info!(
                        addon = %event.addon_id, %status, detail = %event.detail,
                        "add-on status"
                    );
                }
            }
        }
    });

    watcher::spawn(registry.clone(), root);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    Ok(())
}
