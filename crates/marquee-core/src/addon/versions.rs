//! Interface version negotiation.
//!
//! The host compiles in a supported window per interface kind. An add-on is
//! accepted for a kind iff the version it was built against lies inside the
//! window; a differing major version is always a compatibility break.

use marquee_addon::{ApiVersion, InstanceKind};

use crate::error::{Error, Result};

/// `(min supported, current)` window the host accepts for `kind`.
pub fn supported_range(kind: InstanceKind) -> (ApiVersion, ApiVersion) {
    let current = kind.api_current();
    let min = match kind {
        InstanceKind::InputStream => ApiVersion::new(3, 0),
        InstanceKind::AudioDecoder => ApiVersion::new(2, 0),
        InstanceKind::ImageDecoder => ApiVersion::new(1, 1),
        InstanceKind::Screensaver => ApiVersion::new(1, 0),
        InstanceKind::Visualization => ApiVersion::new(2, 0),
        InstanceKind::Vfs => ApiVersion::new(1, 0),
        InstanceKind::PvrClient => ApiVersion::new(4, 0),
    };
    (min, current)
}

/// Accept or refuse the version an add-on was built against.
pub fn negotiate(kind: InstanceKind, requested: ApiVersion) -> Result<ApiVersion> {
    let (min, max) = supported_range(kind);
    if requested.major != max.major || requested < min || requested > max {
        return Err(Error::VersionIncompatible {
            kind,
            requested,
            min,
            max,
        });
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_versions_inside_the_window() {
        let (min, max) = supported_range(InstanceKind::InputStream);
        assert_eq!(negotiate(InstanceKind::InputStream, min).unwrap(), min);
        assert_eq!(negotiate(InstanceKind::InputStream, max).unwrap(), max);
    }

    #[test]
    fn refuses_versions_below_the_minimum() {
        // Visualization window starts at 2.0; a 1.x build predates it.
        let err = negotiate(InstanceKind::Visualization, ApiVersion::new(1, 9)).unwrap_err();
        assert!(matches!(err, Error::VersionIncompatible { .. }));
    }

    #[test]
    fn refuses_versions_above_the_current() {
        let (_, max) = supported_range(InstanceKind::AudioDecoder);
        let newer = ApiVersion::new(max.major, max.minor + 1);
        assert!(negotiate(InstanceKind::AudioDecoder, newer).is_err());
    }

    #[test]
    fn refuses_a_major_bump_even_when_numerically_close() {
        let (_, max) = supported_range(InstanceKind::Screensaver);
        let bumped = ApiVersion::new(max.major + 1, 0);
        assert!(negotiate(InstanceKind::Screensaver, bumped).is_err());
    }

    #[test]
    fn every_window_is_well_formed() {
        for kind in InstanceKind::ALL {
            let (min, max) = supported_range(kind);
            assert!(min <= max, "{kind}: {min} > {max}");
            assert_eq!(min.major, max.major, "{kind}: window spans majors");
        }
    }
}
