//! Host for one loaded add-on shared library.
//!
//! An [`AddonDll`] is created at most once per add-on id and shared behind
//! an `Arc` by every live [`InstanceHandle`]. Dropping the last strong
//! reference destroys any leftover instances, tears down the add-on object
//! and unloads the library.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use libloading::{Library, Symbol};
use marquee_addon::{
    ABI_VERSION, AddonDescriptor, ApiVersion, ENTRY_SYMBOL, HostCallbacks, InstanceKind,
    InterfaceDescriptor, StatusCode,
};
use tracing::{debug, error, trace, warn};

use crate::addon::instance::{InstanceHandle, InstanceToken};
use crate::addon::manifest::AddonManifest;
use crate::addon::status::{AddonStatus, StatusReporter};
use crate::addon::versions;
use crate::error::{Error, Result};

/// One instance the add-on has allocated for the host.
struct LiveInstance {
    kind: InstanceKind,
    instance_id: String,
    ptr: *mut c_void,
}

/// Host-owned state the callback table points into.
struct HostBridge {
    addon_id: String,
    reporter: StatusReporter,
    settings: Mutex<IndexMap<String, serde_json::Value>>,
}

unsafe extern "C" fn log_callback(
    host_data: *mut c_void,
    level: u32,
    message: *const u8,
    len: usize,
) {
    unsafe {
        let bridge = &*(host_data as *const HostBridge);
        let message = std::slice::from_raw_parts(message, len);
        let message = String::from_utf8_lossy(message);
        match level {
            marquee_addon::LOG_TRACE => trace!(addon = %bridge.addon_id, "{message}"),
            marquee_addon::LOG_DEBUG => debug!(addon = %bridge.addon_id, "{message}"),
            marquee_addon::LOG_INFO => tracing::info!(addon = %bridge.addon_id, "{message}"),
            marquee_addon::LOG_WARN => warn!(addon = %bridge.addon_id, "{message}"),
            _ => error!(addon = %bridge.addon_id, "{message}"),
        }
    }
}

unsafe extern "C" fn get_setting_callback(
    host_data: *mut c_void,
    key: *const u8,
    key_len: usize,
    out: *mut u8,
    out_cap: usize,
) -> isize {
    unsafe {
        let bridge = &*(host_data as *const HostBridge);
        let key = std::slice::from_raw_parts(key, key_len);
        let Ok(key) = std::str::from_utf8(key) else {
            return -1;
        };
        let Ok(settings) = bridge.settings.lock() else {
            return -1;
        };
        let Some(value) = settings.get(key) else {
            return -1;
        };
        let Ok(bytes) = serde_json::to_vec(value) else {
            return -1;
        };
        if !out.is_null() && out_cap > 0 {
            let n = bytes.len().min(out_cap);
            ptr::copy_nonoverlapping(bytes.as_ptr(), out, n);
        }
        bytes.len() as isize
    }
}

unsafe extern "C" fn emit_status_callback(
    host_data: *mut c_void,
    status: i32,
    detail: *const u8,
    detail_len: usize,
) {
    unsafe {
        let bridge = &*(host_data as *const HostBridge);
        let detail = std::slice::from_raw_parts(detail, detail_len);
        let detail = String::from_utf8_lossy(detail).into_owned();
        bridge
            .reporter
            .report(&bridge.addon_id, AddonStatus::from_code(StatusCode(status)), detail);
    }
}

/// One loaded add-on library with its negotiated interfaces and live
/// instances.
pub struct AddonDll {
    id: String,
    path: PathBuf,
    /// Entry table resolved from the library. Borrowed for as long as
    /// `library` stays loaded; the `'static` is a promise this struct keeps
    /// by owning the library.
    descriptor: &'static AddonDescriptor,
    negotiated: HashMap<InstanceKind, ApiVersion>,
    addon: *mut c_void,
    /// Instance map; the guard doubles as the mutual-exclusion lock for
    /// every call into the add-on.
    instances: Mutex<HashMap<InstanceToken, LiveInstance>>,
    next_token: AtomicU64,
    bridge: Box<HostBridge>,
    /// Callback table handed to the add-on at create; it may hold the
    /// pointer for its whole lifetime.
    _callbacks: Box<HostCallbacks>,
    _library: Option<Library>,
}

impl std::fmt::Debug for AddonDll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonDll")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// SAFETY: all calls into the add-on go through the instance-map mutex, the
// descriptor and callback table are immutable once built, and the opaque
// add-on pointers are only ever passed back to the library that allocated
// them. The ABI requires add-on entry points to be callable from any
// thread under the host's serialisation.
unsafe impl Send for AddonDll {}
unsafe impl Sync for AddonDll {}

impl AddonDll {
    /// Load the shared library for `manifest`, negotiate interface versions
    /// and create the add-on object.
    pub fn load(
        manifest: &AddonManifest,
        lib_path: &Path,
        initial_settings: IndexMap<String, serde_json::Value>,
        reporter: StatusReporter,
    ) -> Result<Arc<Self>> {
        let library = unsafe { Library::new(lib_path) }.map_err(|e| Error::LibraryLoad {
            path: lib_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let descriptor: &'static AddonDescriptor = unsafe {
            let symbol: Symbol<'_, *const AddonDescriptor> =
                library.get(ENTRY_SYMBOL).map_err(|e| Error::EntrySymbol {
                    path: lib_path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            &**symbol
        };
        Self::attach(
            manifest,
            lib_path.to_path_buf(),
            descriptor,
            Some(library),
            initial_settings,
            reporter,
        )
    }

    /// Wire up an already-resolved descriptor. `library` is `None` only for
    /// compiled-in descriptors.
    pub(crate) fn attach(
        manifest: &AddonManifest,
        path: PathBuf,
        descriptor: &'static AddonDescriptor,
        library: Option<Library>,
        initial_settings: IndexMap<String, serde_json::Value>,
        reporter: StatusReporter,
    ) -> Result<Arc<Self>> {
        if descriptor.abi_version != ABI_VERSION {
            return Err(Error::AbiMismatch {
                expected: ABI_VERSION,
                found: descriptor.abi_version,
            });
        }

        let table: &[InterfaceDescriptor] =
            if descriptor.interfaces.is_null() || descriptor.interface_count == 0 {
                &[]
            } else {
                unsafe {
                    std::slice::from_raw_parts(descriptor.interfaces, descriptor.interface_count)
                }
            };

        // Version negotiation happens before any entry point is called; an
        // incompatible add-on is never entered.
        let mut negotiated = HashMap::new();
        for provided in &manifest.provides {
            let Some(entry) = table.iter().find(|e| e.kind == provided.kind.wire()) else {
                return Err(Error::InterfaceNotProvided {
                    kind: provided.kind,
                    id: manifest.id.clone(),
                });
            };
            let built = ApiVersion::new(entry.api_major, entry.api_minor);
            if built != provided.api {
                return Err(Error::InvalidManifest(format!(
                    "{}: manifest claims {} {} but the library was built against {}",
                    manifest.id, provided.kind, provided.api, built
                )));
            }
            negotiated.insert(provided.kind, versions::negotiate(provided.kind, built)?);
        }

        let bridge = Box::new(HostBridge {
            addon_id: manifest.id.clone(),
            reporter: reporter.clone(),
            settings: Mutex::new(initial_settings),
        });
        let callbacks = Box::new(HostCallbacks {
            host_data: &*bridge as *const HostBridge as *mut c_void,
            log: log_callback,
            get_setting: get_setting_callback,
            emit_status: emit_status_callback,
        });

        let mut addon: *mut c_void = ptr::null_mut();
        let status =
            AddonStatus::from_code(unsafe { (descriptor.create)(&*callbacks, &mut addon) });
        match status {
            AddonStatus::Ok | AddonStatus::NeedSettings => {}
            status => {
                reporter.report_detached(&manifest.id, status, "add-on refused to start");
                if !addon.is_null() {
                    unsafe { (descriptor.destroy)(addon) };
                }
                return Err(Error::AddonStatus {
                    status,
                    detail: format!("{} failed to create", manifest.id),
                });
            }
        }
        if addon.is_null() {
            return Err(Error::AddonStatus {
                status: AddonStatus::PermanentFailure,
                detail: format!("{} returned no add-on handle", manifest.id),
            });
        }

        let dll = Arc::new(Self {
            id: manifest.id.clone(),
            path,
            descriptor,
            negotiated,
            addon,
            instances: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            bridge,
            _callbacks: callbacks,
            _library: library,
        });
        debug!(addon = %dll.id, path = %dll.path.display(), "add-on library loaded");

        if status == AddonStatus::NeedSettings {
            dll.push_cached_settings()?;
        }
        Ok(dll)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Negotiated API version for `kind`, when the add-on provides it.
    pub fn api_version(&self, kind: InstanceKind) -> Option<ApiVersion> {
        self.negotiated.get(&kind).copied()
    }

    pub fn instance_count(&self) -> usize {
        self.lock_instances().len()
    }

    /// Create one instance of `kind` and wrap it in an RAII handle.
    ///
    /// A `NeedSettings` answer triggers the settings transfer and one
    /// retry; every other non-`Ok` status aborts.
    pub fn create_handle(
        self: &Arc<Self>,
        kind: InstanceKind,
        instance_id: &str,
        props: &serde_json::Value,
    ) -> Result<InstanceHandle> {
        let api = self
            .api_version(kind)
            .ok_or_else(|| Error::InterfaceNotProvided {
                kind,
                id: self.id.clone(),
            })?;
        let props_bytes = serde_json::to_vec(props)?;

        let mut transferred = false;
        loop {
            let status = {
                let mut instances = self.lock_instances();
                let mut raw: *mut c_void = ptr::null_mut();
                let status = AddonStatus::from_code(unsafe {
                    (self.descriptor.create_instance)(
                        self.addon,
                        kind.wire(),
                        instance_id.as_ptr(),
                        instance_id.len(),
                        props_bytes.as_ptr(),
                        props_bytes.len(),
                        &mut raw,
                    )
                });
                if status.is_ok() {
                    if raw.is_null() {
                        return Err(Error::AddonStatus {
                            status: AddonStatus::PermanentFailure,
                            detail: format!("{kind}/{instance_id}: no instance handle returned"),
                        });
                    }
                    let token = InstanceToken(self.next_token.fetch_add(1, Ordering::Relaxed));
                    instances.insert(
                        token,
                        LiveInstance {
                            kind,
                            instance_id: instance_id.to_string(),
                            ptr: raw,
                        },
                    );
                    debug!(addon = %self.id, %kind, instance = instance_id, %token, "instance created");
                    return Ok(InstanceHandle::new(
                        Arc::clone(self),
                        kind,
                        api,
                        instance_id.to_string(),
                        token,
                        raw,
                    ));
                }
                status
            };
            match status {
                AddonStatus::NeedSettings if !transferred => {
                    debug!(addon = %self.id, "add-on wants settings before instancing");
                    transferred = true;
                    self.push_cached_settings()?;
                }
                status => {
                    return Err(Error::AddonStatus {
                        status,
                        detail: format!("create_instance {kind}/{instance_id}"),
                    });
                }
            }
        }
    }

    /// Tear down one instance. Idempotent; called from handle drop.
    pub(crate) fn destroy_instance(&self, token: InstanceToken) {
        let mut instances = self.lock_instances();
        let Some(live) = instances.remove(&token) else {
            return;
        };
        unsafe {
            (self.descriptor.destroy_instance)(self.addon, live.kind.wire(), live.ptr);
        }
        debug!(addon = %self.id, kind = %live.kind, instance = %live.instance_id, %token, "instance destroyed");
    }

    /// Replace the cached settings with `values` and push them through the
    /// add-on's `set_setting`.
    pub fn transfer_settings(&self, values: &IndexMap<String, serde_json::Value>) -> Result<()> {
        {
            let mut cached = self
                .bridge
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *cached = values.clone();
        }
        self.push_cached_settings()
    }

    /// Push every cached value through `set_setting`, collecting per-key
    /// statuses. A `NeedRestart` answer is surfaced once at the end;
    /// `PermanentFailure` aborts the transfer.
    fn push_cached_settings(&self) -> Result<()> {
        let Some(set_setting) = self.descriptor.set_setting else {
            debug!(addon = %self.id, "add-on takes no settings");
            return Ok(());
        };
        let snapshot = self
            .bridge
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let _calls = self.lock_instances();
        let mut restart_required = false;
        for (key, value) in &snapshot {
            let bytes = serde_json::to_vec(value)?;
            let status = AddonStatus::from_code(unsafe {
                set_setting(self.addon, key.as_ptr(), key.len(), bytes.as_ptr(), bytes.len())
            });
            match status {
                AddonStatus::Ok => {}
                AddonStatus::NeedRestart => restart_required = true,
                AddonStatus::NotImplemented => {
                    debug!(addon = %self.id, %key, "setting not understood")
                }
                AddonStatus::PermanentFailure => {
                    return Err(Error::AddonStatus {
                        status,
                        detail: format!("settings transfer aborted at {key}"),
                    });
                }
                status => {
                    warn!(addon = %self.id, %key, %status, "unexpected status from set_setting")
                }
            }
        }
        if restart_required {
            self.bridge.reporter.report_detached(
                &self.id,
                AddonStatus::NeedRestart,
                "changed settings take effect after restart",
            );
        }
        Ok(())
    }

    fn lock_instances(&self) -> MutexGuard<'_, HashMap<InstanceToken, LiveInstance>> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn create_instance_raw(&self, kind: InstanceKind, instance_id: &str) -> Result<InstanceToken> {
        let mut instances = self.lock_instances();
        let mut raw: *mut c_void = ptr::null_mut();
        let status = AddonStatus::from_code(unsafe {
            (self.descriptor.create_instance)(
                self.addon,
                kind.wire(),
                instance_id.as_ptr(),
                instance_id.len(),
                b"null".as_ptr(),
                4,
                &mut raw,
            )
        });
        if !status.is_ok() {
            return Err(Error::AddonStatus {
                status,
                detail: instance_id.to_string(),
            });
        }
        let token = InstanceToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        instances.insert(
            token,
            LiveInstance {
                kind,
                instance_id: instance_id.to_string(),
                ptr: raw,
            },
        );
        Ok(token)
    }
}

impl Drop for AddonDll {
    fn drop(&mut self) {
        let leftovers: HashMap<InstanceToken, LiveInstance> = std::mem::take(
            self.instances
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (token, live) in leftovers {
            warn!(
                addon = %self.id, kind = %live.kind, instance = %live.instance_id, %token,
                "instance still live at unload, handler leaked"
            );
            unsafe {
                (self.descriptor.destroy_instance)(self.addon, live.kind.wire(), live.ptr);
            }
        }
        if !self.addon.is_null() {
            unsafe { (self.descriptor.destroy)(self.addon) };
        }
        debug!(addon = %self.id, "add-on library unloading");
        // `_library` (and the descriptor borrowed from it) drop after this.
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::addon::manifest::{PlatformLibraries, ProvidedInterface};

    #[derive(Default)]
    struct FakeCalls {
        creates: u32,
        destroys: u32,
        instance_creates: u32,
        instance_destroys: u32,
        settings: Vec<(String, serde_json::Value)>,
        fail_next_instance: Option<StatusCode>,
        need_settings_until_transfer: bool,
    }

    thread_local! {
        static CALLS: RefCell<FakeCalls> = RefCell::new(FakeCalls::default());
    }

    unsafe extern "C" fn fk_create(
        _host: *const HostCallbacks,
        out_addon: *mut *mut c_void,
    ) -> StatusCode {
        CALLS.with(|c| c.borrow_mut().creates += 1);
        unsafe { *out_addon = 0x1 as *mut c_void };
        StatusCode::OK
    }

    unsafe extern "C" fn fk_destroy(_addon: *mut c_void) {
        CALLS.with(|c| c.borrow_mut().destroys += 1);
    }

    unsafe extern "C" fn fk_create_instance(
        _addon: *mut c_void,
        _kind: u32,
        _id: *const u8,
        _id_len: usize,
        _props: *const u8,
        _props_len: usize,
        out_instance: *mut *mut c_void,
    ) -> StatusCode {
        CALLS.with(|c| {
            let mut c = c.borrow_mut();
            if let Some(code) = c.fail_next_instance.take() {
                return code;
            }
            if c.need_settings_until_transfer && c.settings.is_empty() {
                return StatusCode::NEED_SETTINGS;
            }
            c.instance_creates += 1;
            unsafe { *out_instance = (0x1000 + c.instance_creates as usize) as *mut c_void };
            StatusCode::OK
        })
    }

    unsafe extern "C" fn fk_destroy_instance(_addon: *mut c_void, _kind: u32, _instance: *mut c_void) {
        CALLS.with(|c| c.borrow_mut().instance_destroys += 1);
    }

    unsafe extern "C" fn fk_set_setting(
        _addon: *mut c_void,
        key: *const u8,
        key_len: usize,
        value: *const u8,
        value_len: usize,
    ) -> StatusCode {
        let key = unsafe { std::slice::from_raw_parts(key, key_len) };
        let key = String::from_utf8_lossy(key).into_owned();
        let value = unsafe { std::slice::from_raw_parts(value, value_len) };
        let value: serde_json::Value = serde_json::from_slice(value).unwrap();
        CALLS.with(|c| {
            let mut c = c.borrow_mut();
            if key == "fail" {
                return StatusCode::PERMANENT_FAILURE;
            }
            c.settings.push((key, value));
            StatusCode::OK
        })
    }

    const FAKE_INTERFACES: &[InterfaceDescriptor] =
        &[InterfaceDescriptor::for_kind(InstanceKind::AudioDecoder)];

    const OLD_INTERFACES: &[InterfaceDescriptor] = &[InterfaceDescriptor {
        kind: 2, // audio decoder
        api_major: 1,
        api_minor: 9,
    }];

    const fn fake_descriptor(
        abi_version: u32,
        interfaces: &'static [InterfaceDescriptor],
    ) -> AddonDescriptor {
        AddonDescriptor {
            abi_version,
            interfaces: interfaces.as_ptr(),
            interface_count: interfaces.len(),
            create: fk_create,
            destroy: fk_destroy,
            create_instance: fk_create_instance,
            destroy_instance: fk_destroy_instance,
            set_setting: Some(fk_set_setting),
        }
    }

    static FAKE: AddonDescriptor = fake_descriptor(ABI_VERSION, FAKE_INTERFACES);
    static FAKE_WRONG_ABI: AddonDescriptor = fake_descriptor(ABI_VERSION + 1, FAKE_INTERFACES);
    static FAKE_OLD: AddonDescriptor = fake_descriptor(ABI_VERSION, OLD_INTERFACES);

    fn fake_manifest(api: ApiVersion) -> AddonManifest {
        AddonManifest {
            id: "audio.fake".to_string(),
            name: "Fake decoder".to_string(),
            version: "1.0.0".to_string(),
            author: String::new(),
            summary: String::new(),
            provides: vec![ProvidedInterface {
                kind: InstanceKind::AudioDecoder,
                api,
            }],
            library: PlatformLibraries {
                platforms: IndexMap::new(),
                library: Some("libfake.so".to_string()),
            },
            settings: None,
            broken: None,
        }
    }

    fn attach_fake(
        descriptor: &'static AddonDescriptor,
        api: ApiVersion,
        initial_settings: IndexMap<String, serde_json::Value>,
    ) -> Result<Arc<AddonDll>> {
        CALLS.with(|c| *c.borrow_mut() = FakeCalls::default());
        AddonDll::attach(
            &fake_manifest(api),
            PathBuf::from("/fake/libfake.so"),
            descriptor,
            None,
            initial_settings,
            StatusReporter::sink(),
        )
    }

    fn current() -> ApiVersion {
        InstanceKind::AudioDecoder.api_current()
    }

    #[test]
    fn rejects_descriptor_abi_mismatch() {
        let err = attach_fake(&FAKE_WRONG_ABI, current(), IndexMap::new()).unwrap_err();
        assert!(matches!(err, Error::AbiMismatch { .. }));
        // Nothing was ever called in the add-on.
        CALLS.with(|c| assert_eq!(c.borrow().creates, 0));
    }

    #[test]
    fn rejects_interface_version_outside_window() {
        let err = attach_fake(&FAKE_OLD, ApiVersion::new(1, 9), IndexMap::new()).unwrap_err();
        assert!(matches!(err, Error::VersionIncompatible { .. }));
        CALLS.with(|c| assert_eq!(c.borrow().creates, 0));
    }

    #[test]
    fn rejects_manifest_descriptor_disagreement() {
        let err = attach_fake(&FAKE, ApiVersion::new(2, 0), IndexMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidManifest(_)));
        CALLS.with(|c| assert_eq!(c.borrow().creates, 0));
    }

    #[test]
    fn multiplexes_instances_over_one_load() {
        let dll = attach_fake(&FAKE, current(), IndexMap::new()).unwrap();
        let first = dll
            .create_handle(InstanceKind::AudioDecoder, "a", &serde_json::Value::Null)
            .unwrap();
        let second = dll
            .create_handle(InstanceKind::AudioDecoder, "b", &serde_json::Value::Null)
            .unwrap();
        assert_ne!(first.token(), second.token());
        assert_eq!(dll.instance_count(), 2);
        CALLS.with(|c| {
            assert_eq!(c.borrow().creates, 1);
            assert_eq!(c.borrow().instance_creates, 2);
        });

        drop(first);
        assert_eq!(dll.instance_count(), 1);
        CALLS.with(|c| assert_eq!(c.borrow().instance_destroys, 1));
        drop(second);
        assert_eq!(dll.instance_count(), 0);
    }

    #[test]
    fn refuses_kinds_the_addon_does_not_provide() {
        let dll = attach_fake(&FAKE, current(), IndexMap::new()).unwrap();
        let err = dll
            .create_handle(InstanceKind::InputStream, "a", &serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, Error::InterfaceNotProvided { .. }));
    }

    #[test]
    fn need_settings_triggers_transfer_and_one_retry() {
        let mut initial = IndexMap::new();
        initial.insert("timeout".to_string(), serde_json::json!(30));
        let dll = attach_fake(&FAKE, current(), initial).unwrap();
        CALLS.with(|c| c.borrow_mut().need_settings_until_transfer = true);

        let handle = dll
            .create_handle(InstanceKind::AudioDecoder, "a", &serde_json::Value::Null)
            .unwrap();
        assert_eq!(handle.instance_id(), "a");
        CALLS.with(|c| {
            let c = c.borrow();
            assert_eq!(c.settings, vec![("timeout".to_string(), serde_json::json!(30))]);
            assert_eq!(c.instance_creates, 1);
        });
    }

    #[test]
    fn permanent_failure_aborts_instance_creation() {
        let dll = attach_fake(&FAKE, current(), IndexMap::new()).unwrap();
        CALLS.with(|c| c.borrow_mut().fail_next_instance = Some(StatusCode::PERMANENT_FAILURE));
        let err = dll
            .create_handle(InstanceKind::AudioDecoder, "a", &serde_json::Value::Null)
            .unwrap_err();
        assert_eq!(err.addon_status(), Some(AddonStatus::PermanentFailure));
        assert_eq!(dll.instance_count(), 0);
    }

    #[test]
    fn settings_transfer_aborts_on_permanent_failure() {
        let dll = attach_fake(&FAKE, current(), IndexMap::new()).unwrap();
        let mut values = IndexMap::new();
        values.insert("ok".to_string(), serde_json::json!(1));
        values.insert("fail".to_string(), serde_json::json!(2));
        values.insert("never-sent".to_string(), serde_json::json!(3));
        let err = dll.transfer_settings(&values).unwrap_err();
        assert_eq!(err.addon_status(), Some(AddonStatus::PermanentFailure));
        CALLS.with(|c| {
            let binding = c.borrow();
            let sent: Vec<&str> = binding.settings.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(sent, ["ok"]);
        });
    }

    #[test]
    fn destroy_instance_is_idempotent() {
        let dll = attach_fake(&FAKE, current(), IndexMap::new()).unwrap();
        let token = dll
            .create_instance_raw(InstanceKind::AudioDecoder, "a")
            .unwrap();
        dll.destroy_instance(token);
        dll.destroy_instance(token);
        CALLS.with(|c| assert_eq!(c.borrow().instance_destroys, 1));
    }

    #[test]
    fn unload_destroys_leftover_instances_then_the_addon() {
        let dll = attach_fake(&FAKE, current(), IndexMap::new()).unwrap();
        dll.create_instance_raw(InstanceKind::AudioDecoder, "leaked")
            .unwrap();
        drop(dll);
        CALLS.with(|c| {
            let c = c.borrow();
            assert_eq!(c.instance_destroys, 1);
            assert_eq!(c.destroys, 1);
        });
    }

    #[test]
    fn library_outlives_every_handle() {
        let dll = attach_fake(&FAKE, current(), IndexMap::new()).unwrap();
        let handle = dll
            .create_handle(InstanceKind::AudioDecoder, "a", &serde_json::Value::Null)
            .unwrap();
        drop(dll);
        // The handle still holds the add-on alive.
        CALLS.with(|c| assert_eq!(c.borrow().destroys, 0));
        drop(handle);
        CALLS.with(|c| {
            let c = c.borrow();
            assert_eq!(c.instance_destroys, 1);
            assert_eq!(c.destroys, 1);
        });
    }
}
