pub mod abi;
pub mod context;

pub use abi::*;
pub use context::*;
pub use serde;
pub use serde_json;

/// One logical session created inside an add-on (a demuxer, a decoder, a
/// screensaver run). The host never looks inside it.
pub trait AddonInstance: Send {}

impl<T: Send> AddonInstance for T {}

/// Trait an add-on crate implements for its single add-on object.
///
/// One add-on object exists per loaded library; the host multiplexes any
/// number of instances onto it through [`Addon::create_instance`]. The host
/// serialises all calls, so `&mut self` is sound.
pub trait Addon: Send + Sized {
    /// Create one instance of `kind`. `props` carries the creation
    /// properties the host subsystem supplied, as JSON.
    fn create_instance(
        &mut self,
        ctx: &HostContext,
        kind: InstanceKind,
        instance_id: &str,
        props: &serde_json::Value,
    ) -> Result<Box<dyn AddonInstance>, StatusCode>;

    /// Tear down one instance. The default drops it.
    fn destroy_instance(
        &mut self,
        _ctx: &HostContext,
        _kind: InstanceKind,
        _instance: Box<dyn AddonInstance>,
    ) {
    }

    /// Receive one setting value pushed by the host.
    ///
    /// Return [`StatusCode::NEED_RESTART`] when the new value only takes
    /// effect after a reload.
    fn set_setting(
        &mut self,
        _ctx: &HostContext,
        _key: &str,
        _value: &serde_json::Value,
    ) -> Result<(), StatusCode> {
        Ok(())
    }

    /// Called once before the library is unloaded.
    fn on_destroy(&mut self, _ctx: &HostContext) {}
}

#[doc(hidden)]
pub mod ffi_guard {
    //! Panic containment for the `extern "C"` shims; unwinding must never
    //! cross the library boundary.

    use std::panic::{AssertUnwindSafe, catch_unwind};

    use crate::abi::StatusCode;

    pub fn guard_status(f: impl FnOnce() -> StatusCode) -> StatusCode {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(status) => status,
            Err(_) => StatusCode::PERMANENT_FAILURE,
        }
    }

    pub fn guard_void(f: impl FnOnce()) {
        let _ = catch_unwind(AssertUnwindSafe(f));
    }
}

/// Declare a marquee add-on.
///
/// Expands to the static [`AddonDescriptor`] exported under
/// `MARQUEE_ADDON`, plus the `extern "C"` shims that route calls to the
/// given [`Addon`] implementation. Interface versions are filled in from
/// [`InstanceKind::api_current`].
///
/// # Example
/// ```ignore
/// use marquee_addon::{Addon, AddonInstance, HostContext, InstanceKind, StatusCode, declare_addon};
///
/// struct HlsAddon;
///
/// impl Addon for HlsAddon {
///     fn create_instance(
///         &mut self,
///         ctx: &HostContext,
///         kind: InstanceKind,
///         instance_id: &str,
///         props: &serde_json::Value,
///     ) -> Result<Box<dyn AddonInstance>, StatusCode> {
///         ctx.info(&format!("opening {instance_id}"));
///         Ok(Box::new(()))
///     }
/// }
///
/// declare_addon!(HlsAddon, [InstanceKind::InputStream], |ctx| {
///     ctx.info("hls add-on ready");
///     Ok(HlsAddon)
/// });
/// ```
#[macro_export]
macro_rules! declare_addon {
    ($addon_type:ty, [$($kind:expr),+ $(,)?], $create:expr) => {
        static __MARQUEE_STATE: std::sync::Mutex<Option<$addon_type>> =
            std::sync::Mutex::new(None);
        static __MARQUEE_HOST: std::sync::atomic::AtomicPtr<$crate::HostCallbacks> =
            std::sync::atomic::AtomicPtr::new(std::ptr::null_mut());

        const __MARQUEE_INTERFACES: &[$crate::InterfaceDescriptor] =
            &[$($crate::InterfaceDescriptor::for_kind($kind)),+];

        #[unsafe(no_mangle)]
        pub static MARQUEE_ADDON: $crate::AddonDescriptor = $crate::AddonDescriptor {
            abi_version: $crate::ABI_VERSION,
            interfaces: __MARQUEE_INTERFACES.as_ptr(),
            interface_count: __MARQUEE_INTERFACES.len(),
            create: __marquee_create,
            destroy: __marquee_destroy,
            create_instance: __marquee_create_instance,
            destroy_instance: __marquee_destroy_instance,
            set_setting: Some(__marquee_set_setting),
        };

        fn __marquee_context() -> Option<$crate::HostContext> {
            let host = __MARQUEE_HOST.load(std::sync::atomic::Ordering::Acquire);
            if host.is_null() {
                None
            } else {
                Some(unsafe { $crate::HostContext::from_raw(host) })
            }
        }

        unsafe extern "C" fn __marquee_create(
            host: *const $crate::HostCallbacks,
            out_addon: *mut *mut core::ffi::c_void,
        ) -> $crate::StatusCode {
            $crate::ffi_guard::guard_status(|| {
                if host.is_null() || out_addon.is_null() {
                    return $crate::StatusCode::PERMANENT_FAILURE;
                }
                __MARQUEE_HOST.store(host.cast_mut(), std::sync::atomic::Ordering::Release);
                let ctx = unsafe { $crate::HostContext::from_raw(host) };
                let create_fn: fn(&$crate::HostContext) -> Result<$addon_type, $crate::StatusCode> =
                    $create;
                match create_fn(&ctx) {
                    Ok(addon) => {
                        let Ok(mut state) = __MARQUEE_STATE.lock() else {
                            return $crate::StatusCode::PERMANENT_FAILURE;
                        };
                        *state = Some(addon);
                        unsafe {
                            *out_addon =
                                &__MARQUEE_STATE as *const _ as *mut core::ffi::c_void;
                        }
                        $crate::StatusCode::OK
                    }
                    Err(code) => code,
                }
            })
        }

        unsafe extern "C" fn __marquee_destroy(_addon: *mut core::ffi::c_void) {
            $crate::ffi_guard::guard_void(|| {
                let Ok(mut state) = __MARQUEE_STATE.lock() else {
                    return;
                };
                if let (Some(addon), Some(ctx)) = (state.as_mut(), __marquee_context()) {
                    <$addon_type as $crate::Addon>::on_destroy(addon, &ctx);
                }
                *state = None;
                __MARQUEE_HOST.store(
                    std::ptr::null_mut(),
                    std::sync::atomic::Ordering::Release,
                );
            });
        }

        unsafe extern "C" fn __marquee_create_instance(
            _addon: *mut core::ffi::c_void,
            kind: u32,
            instance_id: *const u8,
            instance_id_len: usize,
            props: *const u8,
            props_len: usize,
            out_instance: *mut *mut core::ffi::c_void,
        ) -> $crate::StatusCode {
            $crate::ffi_guard::guard_status(|| {
                if out_instance.is_null() {
                    return $crate::StatusCode::PERMANENT_FAILURE;
                }
                let Some(kind) = $crate::InstanceKind::from_wire(kind) else {
                    return $crate::StatusCode::NOT_IMPLEMENTED;
                };
                let Some(ctx) = __marquee_context() else {
                    return $crate::StatusCode::UNKNOWN;
                };
                let instance_id = {
                    let bytes =
                        unsafe { std::slice::from_raw_parts(instance_id, instance_id_len) };
                    match std::str::from_utf8(bytes) {
                        Ok(s) => s,
                        Err(_) => return $crate::StatusCode::UNKNOWN,
                    }
                };
                let props = if props_len == 0 {
                    $crate::serde_json::Value::Null
                } else {
                    let bytes = unsafe { std::slice::from_raw_parts(props, props_len) };
                    match $crate::serde_json::from_slice(bytes) {
                        Ok(v) => v,
                        Err(_) => return $crate::StatusCode::UNKNOWN,
                    }
                };
                let Ok(mut state) = __MARQUEE_STATE.lock() else {
                    return $crate::StatusCode::PERMANENT_FAILURE;
                };
                let Some(addon) = state.as_mut() else {
                    return $crate::StatusCode::UNKNOWN;
                };
                match <$addon_type as $crate::Addon>::create_instance(
                    addon,
                    &ctx,
                    kind,
                    instance_id,
                    &props,
                ) {
                    Ok(instance) => {
                        let raw: *mut Box<dyn $crate::AddonInstance> =
                            Box::into_raw(Box::new(instance));
                        unsafe { *out_instance = raw as *mut core::ffi::c_void };
                        $crate::StatusCode::OK
                    }
                    Err(code) => code,
                }
            })
        }

        unsafe extern "C" fn __marquee_destroy_instance(
            _addon: *mut core::ffi::c_void,
            kind: u32,
            instance: *mut core::ffi::c_void,
        ) {
            $crate::ffi_guard::guard_void(|| {
                if instance.is_null() {
                    return;
                }
                let boxed = unsafe {
                    Box::from_raw(instance as *mut Box<dyn $crate::AddonInstance>)
                };
                let Some(kind) = $crate::InstanceKind::from_wire(kind) else {
                    return;
                };
                let Ok(mut state) = __MARQUEE_STATE.lock() else {
                    return;
                };
                if let (Some(addon), Some(ctx)) = (state.as_mut(), __marquee_context()) {
                    <$addon_type as $crate::Addon>::destroy_instance(addon, &ctx, kind, *boxed);
                }
            });
        }

        unsafe extern "C" fn __marquee_set_setting(
            _addon: *mut core::ffi::c_void,
            key: *const u8,
            key_len: usize,
            value: *const u8,
            value_len: usize,
        ) -> $crate::StatusCode {
            $crate::ffi_guard::guard_status(|| {
                let key = {
                    let bytes = unsafe { std::slice::from_raw_parts(key, key_len) };
                    match std::str::from_utf8(bytes) {
                        Ok(s) => s,
                        Err(_) => return $crate::StatusCode::UNKNOWN,
                    }
                };
                let value = {
                    let bytes = unsafe { std::slice::from_raw_parts(value, value_len) };
                    match $crate::serde_json::from_slice(bytes) {
                        Ok(v) => v,
                        Err(_) => return $crate::StatusCode::UNKNOWN,
                    }
                };
                let Some(ctx) = __marquee_context() else {
                    return $crate::StatusCode::UNKNOWN;
                };
                let Ok(mut state) = __MARQUEE_STATE.lock() else {
                    return $crate::StatusCode::PERMANENT_FAILURE;
                };
                let Some(addon) = state.as_mut() else {
                    return $crate::StatusCode::UNKNOWN;
                };
                match <$addon_type as $crate::Addon>::set_setting(addon, &ctx, key, &value) {
                    Ok(()) => $crate::StatusCode::OK,
                    Err(code) => code,
                }
            })
        }
    };
}
