use std::path::PathBuf;

use marquee_addon::{ApiVersion, InstanceKind};
use thiserror::Error;

use crate::addon::status::AddonStatus;

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("add-on {0} not found")]
    AddonNotFound(String),

    #[error("add-on {0} is disabled")]
    AddonDisabled(String),

    #[error("add-on {id} is marked broken: {reason}")]
    AddonBroken { id: String, reason: String },

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("add-on {id} ships no library for platform {platform}")]
    NoPlatformLibrary { id: String, platform: String },

    #[error("failed to load library {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    #[error("entry symbol missing in {path}: {reason}")]
    EntrySymbol { path: PathBuf, reason: String },

    #[error("descriptor ABI v{found} not supported, host speaks v{expected}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("{kind} interface v{requested} outside supported range {min}..={max}")]
    VersionIncompatible {
        kind: InstanceKind,
        requested: ApiVersion,
        min: ApiVersion,
        max: ApiVersion,
    },

    #[error("add-on {id} does not provide a {kind} interface")]
    InterfaceNotProvided { kind: InstanceKind, id: String },

    #[error("add-on returned {status}: {detail}")]
    AddonStatus { status: AddonStatus, detail: String },

    #[error("invalid settings for {id}: {reason}")]
    InvalidSettings { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Status carried by the error, when the failure originated inside the
    /// add-on rather than in the host.
    pub fn addon_status(&self) -> Option<AddonStatus> {
        match self {
            Error::AddonStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
