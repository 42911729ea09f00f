//! Registry of installed add-on packages.
//!
//! One [`AddonEntry`] per discovered package. The entry owns the single
//! shared [`AddonDll`] for its id through a `Weak`, so the library loads on
//! first demand, is shared by every handler, and unloads when the last
//! handler releases.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use marquee_addon::InstanceKind;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::addon::dll::AddonDll;
use crate::addon::instance::InstanceHandle;
use crate::addon::manifest::{AddonManifest, PlatformLibraries};
use crate::addon::status::{AddonStatus, StatusReporter};
use crate::error::{Error, Result};
use crate::settings::SettingsStore;

/// Manifest file name inside every package directory.
pub const MANIFEST_FILE: &str = "addon.json";

/// One discovered add-on package.
pub struct AddonEntry {
    pub manifest: AddonManifest,
    pub path: PathBuf,
    dll: Mutex<Weak<AddonDll>>,
    disabled: AtomicBool,
}

impl AddonEntry {
    fn new(manifest: AddonManifest, path: PathBuf) -> Self {
        Self {
            manifest,
            path,
            dll: Mutex::new(Weak::new()),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.disabled.store(!enabled, Ordering::Release);
    }

    /// Whether the shared library is currently loaded.
    pub fn is_loaded(&self) -> bool {
        self.dll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }

    /// The loaded library, without loading it.
    pub fn loaded_dll(&self) -> Option<Arc<AddonDll>> {
        self.dll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Absolute path of the shared library for this platform.
    pub fn library_path(&self) -> Option<PathBuf> {
        let relative = self.manifest.library.for_current_platform()?;
        let absolute = self.path.join(relative);
        if absolute.exists() {
            Some(absolute)
        } else {
            warn!(
                addon = %self.manifest.id, path = %absolute.display(),
                "library named in manifest not found"
            );
            None
        }
    }

    /// Upgrade the cached library or load it. Held under the entry's mutex
    /// so concurrent first acquisitions load the library once.
    fn acquire_with(
        &self,
        load: impl FnOnce() -> Result<Arc<AddonDll>>,
    ) -> Result<Arc<AddonDll>> {
        let mut slot = self.dll.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dll) = slot.upgrade() {
            return Ok(dll);
        }
        let dll = load()?;
        *slot = Arc::downgrade(&dll);
        Ok(dll)
    }

    /// The shared [`AddonDll`] for this entry, loading it on first demand.
    pub fn acquire(
        &self,
        settings: &SettingsStore,
        reporter: &StatusReporter,
    ) -> Result<Arc<AddonDll>> {
        if let Some(reason) = &self.manifest.broken {
            return Err(Error::AddonBroken {
                id: self.manifest.id.clone(),
                reason: reason.clone(),
            });
        }
        let lib_path = self.library_path().ok_or_else(|| Error::NoPlatformLibrary {
            id: self.manifest.id.clone(),
            platform: PlatformLibraries::current_platform(),
        })?;
        self.acquire_with(|| {
            let initial =
                settings.load_or_defaults(&self.manifest.id, self.manifest.settings.as_ref());
            AddonDll::load(&self.manifest, &lib_path, initial, reporter.clone())
        })
    }
}

/// All installed add-on packages, keyed by id.
pub struct AddonRegistry {
    root: PathBuf,
    settings: SettingsStore,
    reporter: StatusReporter,
    entries: RwLock<HashMap<String, Arc<AddonEntry>>>,
}

impl AddonRegistry {
    pub fn new(
        root: impl Into<PathBuf>,
        settings: SettingsStore,
        reporter: StatusReporter,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            settings,
            reporter,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_default_dirs(reporter: StatusReporter) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not find home directory",
            ))
        })?;
        Self::new(
            home.join(".marquee").join("addons"),
            SettingsStore::with_default_dir()?,
            reporter,
        )
    }

    pub fn addons_dir(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Enumerate package directories and refresh the entry map. Packages
    /// with unparseable manifests are skipped with a warning; entries whose
    /// directory vanished are dropped. Returns the ids now present.
    pub async fn scan(&self) -> Result<Vec<String>> {
        let mut found: HashMap<String, (AddonManifest, PathBuf)> = HashMap::new();
        if self.root.exists() {
            for dir_entry in fs::read_dir(&self.root)? {
                let dir_entry = dir_entry?;
                let path = dir_entry.path();
                if !path.is_dir() {
                    continue;
                }
                match Self::load_manifest(&path) {
                    Ok(manifest) => {
                        found.insert(manifest.id.clone(), (manifest, path));
                    }
                    Err(err) => {
                        warn!(path = %path.display(), "skipping package: {err}");
                    }
                }
            }
        }

        let mut entries = self.entries.write().await;
        entries.retain(|id, _| {
            let keep = found.contains_key(id);
            if !keep {
                debug!(addon = %id, "package removed");
            }
            keep
        });
        for (id, (manifest, path)) in found {
            if let Some(existing) = entries.get(&id) {
                // A live entry keeps its loaded library; the refreshed
                // manifest applies after the next reload.
                if existing.is_loaded() {
                    if existing.manifest.version != manifest.version {
                        debug!(addon = %id, "manifest changed while loaded, deferring");
                    }
                    continue;
                }
            }
            let entry = AddonEntry::new(manifest, path);
            // A rescan must not silently re-enable what the host disabled.
            if let Some(existing) = entries.get(&id) {
                entry.set_enabled(existing.is_enabled());
            }
            entries.insert(id, Arc::new(entry));
        }

        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        info!(count = ids.len(), "add-on scan complete");
        Ok(ids)
    }

    fn load_manifest(dir: &Path) -> Result<AddonManifest> {
        let content = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest = AddonManifest::from_json(&content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<AddonEntry>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn entries(&self) -> Vec<Arc<AddonEntry>> {
        let mut all: Vec<Arc<AddonEntry>> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        all
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let entry = self
            .get(id)
            .await
            .ok_or_else(|| Error::AddonNotFound(id.to_string()))?;
        entry.set_enabled(enabled);
        info!(addon = %id, enabled, "add-on state changed");
        Ok(())
    }

    /// Create one instance of `kind` in add-on `id`, loading the library on
    /// first demand. This is the fan-in every host subsystem goes through.
    pub async fn create_handle(
        &self,
        id: &str,
        kind: InstanceKind,
        instance_id: &str,
        props: &serde_json::Value,
    ) -> Result<InstanceHandle> {
        let entry = self
            .get(id)
            .await
            .ok_or_else(|| Error::AddonNotFound(id.to_string()))?;
        if !entry.is_enabled() {
            return Err(Error::AddonDisabled(id.to_string()));
        }
        if !entry.manifest.provides(kind) {
            return Err(Error::InterfaceNotProvided {
                kind,
                id: id.to_string(),
            });
        }
        let dll = entry.acquire(&self.settings, &self.reporter)?;
        match dll.create_handle(kind, instance_id, props) {
            Err(err) if err.addon_status() == Some(AddonStatus::PermanentFailure) => {
                warn!(addon = %id, "disabling add-on after permanent failure");
                entry.set_enabled(false);
                self.reporter.report_detached(
                    id,
                    AddonStatus::PermanentFailure,
                    format!("creating {kind}/{instance_id} failed"),
                );
                Err(err)
            }
            other => other,
        }
    }

    /// Validate, persist, and when the add-on is loaded, push the new
    /// values through its `set_setting`.
    pub async fn save_settings(
        &self,
        id: &str,
        values: &indexmap::IndexMap<String, serde_json::Value>,
    ) -> Result<()> {
        let entry = self
            .get(id)
            .await
            .ok_or_else(|| Error::AddonNotFound(id.to_string()))?;
        self.settings
            .save(id, values, entry.manifest.settings.as_ref())?;
        if let Some(dll) = entry.loaded_dll() {
            dll.transfer_settings(values)?;
        }
        Ok(())
    }
}
