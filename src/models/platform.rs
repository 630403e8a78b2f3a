//! Platform and SDK definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Target platform of a run, as supplied on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Platform {
    #[value(name = "ios_device")]
    IosDevice,
    #[value(name = "ios_simulator")]
    IosSimulator,
}

impl Platform {
    pub fn sdk(&self) -> Sdk {
        match self {
            Platform::IosDevice => Sdk::Iphoneos,
            Platform::IosSimulator => Sdk::Iphonesimulator,
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Platform::IosDevice => "ios_device",
            Platform::IosSimulator => "ios_simulator",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Apple SDK a run is built against. Doubles as the device-kind tag: a
/// resolved device id is either an `iphoneos` device or an
/// `iphonesimulator` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sdk {
    Iphoneos,
    Iphonesimulator,
}

impl Sdk {
    pub fn short_name(&self) -> &'static str {
        match self {
            Sdk::Iphoneos => "iphoneos",
            Sdk::Iphonesimulator => "iphonesimulator",
        }
    }

    pub fn is_simulator(&self) -> bool {
        matches!(self, Sdk::Iphonesimulator)
    }
}

impl fmt::Display for Sdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Operating system family of a simulator runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Ios,
    WatchOs,
    TvOs,
}

impl Os {
    pub fn display_name(&self) -> &'static str {
        match self {
            Os::Ios => "iOS",
            Os::WatchOs => "watchOS",
            Os::TvOs => "tvOS",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_maps_to_sdk() {
        assert_eq!(Platform::IosDevice.sdk(), Sdk::Iphoneos);
        assert_eq!(Platform::IosSimulator.sdk(), Sdk::Iphonesimulator);
    }

    #[test]
    fn string_forms_match_tool_literals() {
        assert_eq!(Platform::IosDevice.to_string(), "ios_device");
        assert_eq!(Sdk::Iphonesimulator.to_string(), "iphonesimulator");
        assert_eq!(Os::Ios.to_string(), "iOS");
    }
}
