//! C ABI shared between the marquee host and binary add-ons.
//!
//! Everything in this module is `#[repr(C)]` and crosses the shared-library
//! boundary. Any layout change requires bumping [`ABI_VERSION`].

use std::ffi::c_void;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Version of the [`AddonDescriptor`] layout itself. The host checks this
/// before reading any other field of the table.
pub const ABI_VERSION: u32 = 2;

/// Symbol every add-on library exports.
pub const ENTRY_SYMBOL: &[u8] = b"MARQUEE_ADDON";

/// Log level values carried across the ABI.
pub const LOG_TRACE: u32 = 0;
pub const LOG_DEBUG: u32 = 1;
pub const LOG_INFO: u32 = 2;
pub const LOG_WARN: u32 = 3;
pub const LOG_ERROR: u32 = 4;

/// Result code returned by add-on entry points.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    pub const NEED_RESTART: StatusCode = StatusCode(1);
    pub const NEED_SETTINGS: StatusCode = StatusCode(2);
    pub const PERMANENT_FAILURE: StatusCode = StatusCode(3);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(4);
    pub const UNKNOWN: StatusCode = StatusCode(-1);

    pub fn is_ok(self) -> bool {
        self == StatusCode::OK
    }
}

/// Version of one interface a library implements or a host speaks.
///
/// Ordered by `(major, minor)`; serialised as `"major.minor"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

impl ApiVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| format!("expected \"major.minor\", got {s:?}"))?;
        let major = major
            .parse::<u16>()
            .map_err(|e| format!("bad major in {s:?}: {e}"))?;
        let minor = minor
            .parse::<u16>()
            .map_err(|e| format!("bad minor in {s:?}: {e}"))?;
        Ok(Self { major, minor })
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// The interface types the host can ask an add-on to instantiate.
///
/// Each kind carries a stable wire value and its own API version stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceKind {
    InputStream,
    AudioDecoder,
    ImageDecoder,
    Screensaver,
    Visualization,
    Vfs,
    PvrClient,
}

impl InstanceKind {
    pub const ALL: [InstanceKind; 7] = [
        InstanceKind::InputStream,
        InstanceKind::AudioDecoder,
        InstanceKind::ImageDecoder,
        InstanceKind::Screensaver,
        InstanceKind::Visualization,
        InstanceKind::Vfs,
        InstanceKind::PvrClient,
    ];

    /// Stable value carried in [`InterfaceDescriptor::kind`].
    pub const fn wire(self) -> u32 {
        match self {
            InstanceKind::InputStream => 1,
            InstanceKind::AudioDecoder => 2,
            InstanceKind::ImageDecoder => 3,
            InstanceKind::Screensaver => 4,
            InstanceKind::Visualization => 5,
            InstanceKind::Vfs => 6,
            InstanceKind::PvrClient => 7,
        }
    }

    pub const fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(InstanceKind::InputStream),
            2 => Some(InstanceKind::AudioDecoder),
            3 => Some(InstanceKind::ImageDecoder),
            4 => Some(InstanceKind::Screensaver),
            5 => Some(InstanceKind::Visualization),
            6 => Some(InstanceKind::Vfs),
            7 => Some(InstanceKind::PvrClient),
            _ => None,
        }
    }

    /// The interface version this crate was built for. Add-ons declared with
    /// [`declare_addon!`](crate::declare_addon) report these versions.
    pub const fn api_current(self) -> ApiVersion {
        match self {
            InstanceKind::InputStream => ApiVersion::new(3, 2),
            InstanceKind::AudioDecoder => ApiVersion::new(2, 1),
            InstanceKind::ImageDecoder => ApiVersion::new(1, 3),
            InstanceKind::Screensaver => ApiVersion::new(1, 0),
            InstanceKind::Visualization => ApiVersion::new(2, 0),
            InstanceKind::Vfs => ApiVersion::new(1, 1),
            InstanceKind::PvrClient => ApiVersion::new(4, 2),
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceKind::InputStream => "input-stream",
            InstanceKind::AudioDecoder => "audio-decoder",
            InstanceKind::ImageDecoder => "image-decoder",
            InstanceKind::Screensaver => "screensaver",
            InstanceKind::Visualization => "visualization",
            InstanceKind::Vfs => "vfs",
            InstanceKind::PvrClient => "pvr-client",
        };
        f.write_str(name)
    }
}

/// One interface a library implements, with the API version it was built
/// against.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterfaceDescriptor {
    pub kind: u32,
    pub api_major: u16,
    pub api_minor: u16,
}

impl InterfaceDescriptor {
    /// Descriptor entry for `kind` at the version this dev kit targets.
    pub const fn for_kind(kind: InstanceKind) -> Self {
        let api = kind.api_current();
        Self {
            kind: kind.wire(),
            api_major: api.major,
            api_minor: api.minor,
        }
    }
}

/// Callback table the host hands to the add-on at creation.
///
/// All callbacks take `host_data` as their first argument. String arguments
/// are `(pointer, length)` pairs of UTF-8 bytes; structured payloads are
/// JSON bytes. The table stays valid until the add-on is destroyed.
#[repr(C)]
pub struct HostCallbacks {
    pub host_data: *mut c_void,

    /// Forward a log line to the host.
    pub log:
        unsafe extern "C" fn(host_data: *mut c_void, level: u32, message: *const u8, len: usize),

    /// Read one stored setting as JSON bytes.
    ///
    /// Returns the full encoded length, writing at most `out_cap` bytes to
    /// `out`, or -1 when the key has no stored value. Call once with a null
    /// buffer to size, then again to fill.
    pub get_setting: unsafe extern "C" fn(
        host_data: *mut c_void,
        key: *const u8,
        key_len: usize,
        out: *mut u8,
        out_cap: usize,
    ) -> isize,

    /// Report an asynchronous status change to the host.
    pub emit_status: unsafe extern "C" fn(
        host_data: *mut c_void,
        status: i32,
        detail: *const u8,
        detail_len: usize,
    ),
}

/// Entry table exported by every add-on under [`ENTRY_SYMBOL`].
#[repr(C)]
pub struct AddonDescriptor {
    pub abi_version: u32,

    /// Interfaces the library implements, one entry per kind.
    pub interfaces: *const InterfaceDescriptor,
    pub interface_count: usize,

    /// Called once after load. `out_addon` receives an opaque pointer passed
    /// back on every later call.
    pub create: unsafe extern "C" fn(
        host: *const HostCallbacks,
        out_addon: *mut *mut c_void,
    ) -> StatusCode,

    /// Called once before unload.
    pub destroy: unsafe extern "C" fn(addon: *mut c_void),

    /// Create one logical instance of `kind`. `props` is a JSON document of
    /// creation properties; `out_instance` receives the add-on-allocated
    /// opaque instance pointer.
    pub create_instance: unsafe extern "C" fn(
        addon: *mut c_void,
        kind: u32,
        instance_id: *const u8,
        instance_id_len: usize,
        props: *const u8,
        props_len: usize,
        out_instance: *mut *mut c_void,
    ) -> StatusCode,

    /// Destroy one instance previously returned by `create_instance`.
    pub destroy_instance: unsafe extern "C" fn(addon: *mut c_void, kind: u32, instance: *mut c_void),

    /// Receive one setting value (JSON bytes) from the host. Optional.
    pub set_setting: Option<
        unsafe extern "C" fn(
            addon: *mut c_void,
            key: *const u8,
            key_len: usize,
            value: *const u8,
            value_len: usize,
        ) -> StatusCode,
    >,
}

// SAFETY: the descriptor is a table of function pointers plus a pointer to a
// static interface array; nothing in it is mutated after the library is
// built, so sharing it across threads is sound.
unsafe impl Sync for AddonDescriptor {}
unsafe impl Send for AddonDescriptor {}
