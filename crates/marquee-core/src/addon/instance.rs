//! RAII handles over add-on instances.

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use marquee_addon::{ApiVersion, InstanceKind};

use crate::addon::dll::AddonDll;

/// Identity of one live instance inside a loaded add-on. Two handles with
/// the same instance id are still distinct instances; the token is the
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceToken(pub(crate) u64);

impl fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle a host subsystem holds for one add-on instance.
///
/// Holds the shared [`AddonDll`] alive; dropping the handle destroys the
/// instance, and dropping the last handle for an add-on unloads its
/// library.
pub struct InstanceHandle {
    dll: Arc<AddonDll>,
    kind: InstanceKind,
    api: ApiVersion,
    instance_id: String,
    token: InstanceToken,
    raw: *mut c_void,
}

impl InstanceHandle {
    pub(crate) fn new(
        dll: Arc<AddonDll>,
        kind: InstanceKind,
        api: ApiVersion,
        instance_id: String,
        token: InstanceToken,
        raw: *mut c_void,
    ) -> Self {
        Self {
            dll,
            kind,
            api,
            instance_id,
            token,
            raw,
        }
    }

    pub fn addon_id(&self) -> &str {
        self.dll.id()
    }

    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    /// Interface version negotiated with the add-on at load.
    pub fn api_version(&self) -> ApiVersion {
        self.api
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn token(&self) -> InstanceToken {
        self.token
    }

    /// The add-on-allocated instance pointer, for the owning subsystem's
    /// per-kind call table. The pointer stays valid for the handle's
    /// lifetime.
    pub fn raw(&self) -> *mut c_void {
        self.raw
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("addon", &self.addon_id())
            .field("kind", &self.kind)
            .field("instance_id", &self.instance_id)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        self.dll.destroy_instance(self.token);
    }
}

// SAFETY: the raw instance pointer is only ever handed back to the add-on
// that allocated it, through the dll's serialised call path; the handle
// itself exposes it read-only.
unsafe impl Send for InstanceHandle {}
unsafe impl Sync for InstanceHandle {}
