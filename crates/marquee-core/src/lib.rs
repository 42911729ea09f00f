//! Host side of the marquee binary add-on subsystem.
//!
//! One [`AddonRegistry`] tracks every installed add-on package. Each entry
//! owns at most one loaded [`AddonDll`], shared by every live
//! [`InstanceHandle`] for that add-on; when the last handle drops, the
//! library unloads. Interface versions are negotiated at load time against
//! the compiled-in ranges in [`addon::versions`].

pub mod addon;
pub mod error;
pub mod settings;

pub use addon::*;
pub use error::*;
pub use settings::*;

pub use marquee_addon::{ApiVersion, InstanceKind, StatusCode};
