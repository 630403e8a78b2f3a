//! Version-number parsing and normalization.
//!
//! Toolchain versions are packed into a single integer for ordered
//! comparisons (`8.2.1` becomes `821`). OS versions are compared as
//! `major.minor` floats. Device-type profiles carry Apple sentinel values
//! (`x.255.y`, `x.99.y`, `65535.*`) that must be normalized before any
//! comparison is meaningful.

use crate::models::RunnerError;

/// Packs a dotted version string as `major * 100 + minor * 10 + patch`.
///
/// `8.2.1` -> 821, `11.4` -> 1140, `13` -> 1300.
pub fn version_number(version: &str) -> Result<u32, RunnerError> {
    let mut parts = version.trim().split('.');
    let parse = |part: Option<&str>| -> Result<u32, RunnerError> {
        match part {
            None => Ok(0),
            Some(p) => p.parse::<u32>().map_err(|_| {
                RunnerError::illegal_argument(format!("Invalid version string: {version}"))
            }),
        }
    };
    let major = parse(parts.next())?;
    let minor = parse(parts.next())?;
    let patch = parse(parts.next())?;
    Ok(major * 100 + minor * 10 + patch)
}

/// Extracts the `major.minor` value of an OS version string, dropping any
/// build component. `9.3.3` -> 9.3.
pub fn os_version_value(version: &str) -> Result<f64, RunnerError> {
    let mut parts = version.trim().split('.');
    let major: f64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| RunnerError::illegal_argument(format!("Invalid OS version: {version}")))?;
    let minor: f64 = match parts.next() {
        None => 0.0,
        Some(p) => p
            .parse()
            .map_err(|_| RunnerError::illegal_argument(format!("Invalid OS version: {version}")))?,
    };
    Ok(major + minor / 10.0_f64.powi(digits(minor) as i32))
}

/// Normalizes an OS version from a device-type profile.
///
/// Profiles use sentinel encodings: a minor of 255 or 99 means "any release
/// of this major" and collapses to `major.99`; a major of 65535 means no
/// upper bound at all.
pub fn normalize_profile_os_version(version: &str) -> Result<f64, RunnerError> {
    let mut parts = version.trim().split('.');
    let major: u64 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| RunnerError::plist(format!("Invalid profile OS version: {version}")))?;
    if major == 65535 {
        return Ok(f64::INFINITY);
    }
    let minor: u64 = match parts.next() {
        None => 0,
        Some(p) => p
            .parse()
            .map_err(|_| RunnerError::plist(format!("Invalid profile OS version: {version}")))?,
    };
    if minor == 255 || minor == 99 {
        return Ok(major as f64 + 0.99);
    }
    os_version_value(&format!("{major}.{minor}"))
}

fn digits(value: f64) -> u32 {
    let mut n = value as u64;
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_number_packs_three_components() {
        assert_eq!(version_number("8.2.1").unwrap(), 821);
        assert_eq!(version_number("11.4").unwrap(), 1140);
        assert_eq!(version_number("13").unwrap(), 1300);
        assert_eq!(version_number("12.2").unwrap(), 1220);
    }

    #[test]
    fn version_number_rejects_garbage() {
        assert!(version_number("8.x").is_err());
        assert!(version_number("").is_err());
    }

    #[test]
    fn os_version_drops_build_component() {
        assert_eq!(os_version_value("9.3.3").unwrap(), 9.3);
        assert_eq!(os_version_value("10.2").unwrap(), 10.2);
        assert_eq!(os_version_value("14").unwrap(), 14.0);
    }

    #[test]
    fn sentinel_minors_collapse() {
        assert_eq!(normalize_profile_os_version("10.255.255").unwrap(), 10.99);
        assert_eq!(normalize_profile_os_version("12.99.0").unwrap(), 12.99);
    }

    #[test]
    fn sentinel_major_means_unbounded() {
        assert!(normalize_profile_os_version("65535.255.255")
            .unwrap()
            .is_infinite());
    }

    // Property-style sweep: packing is strictly monotonic in each component
    // and normalization never exceeds the sentinel bound.
    #[test]
    fn version_number_is_monotonic() {
        for major in 1u32..16 {
            for minor in 0u32..10 {
                for patch in 0u32..10 {
                    let packed = version_number(&format!("{major}.{minor}.{patch}")).unwrap();
                    assert_eq!(packed, major * 100 + minor * 10 + patch);
                    if patch > 0 {
                        let prev = version_number(&format!("{major}.{minor}.{}", patch - 1));
                        assert!(packed > prev.unwrap());
                    }
                }
            }
        }
    }

    #[test]
    fn normalized_versions_stay_below_unbounded() {
        let unbounded = normalize_profile_os_version("65535.0.0").unwrap();
        for major in 1u64..30 {
            for minor in [0u64, 1, 4, 9, 99, 255] {
                let normalized =
                    normalize_profile_os_version(&format!("{major}.{minor}.7")).unwrap();
                assert!(normalized < unbounded);
                assert!(normalized >= major as f64);
                assert!(normalized < (major + 1) as f64);
            }
        }
    }
}
