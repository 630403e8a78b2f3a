//! CPU architecture tags for Mach-O binaries.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Armv7,
    Armv7s,
    Arm64,
    Arm64e,
    I386,
    X86_64,
}

impl Arch {
    pub fn short_name(&self) -> &'static str {
        match self {
            Arch::Armv7 => "armv7",
            Arch::Armv7s => "armv7s",
            Arch::Arm64 => "arm64",
            Arch::Arm64e => "arm64e",
            Arch::I386 => "i386",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "armv7" => Ok(Arch::Armv7),
            "armv7s" => Ok(Arch::Armv7s),
            "arm64" => Ok(Arch::Arm64),
            "arm64e" => Ok(Arch::Arm64e),
            "i386" => Ok(Arch::I386),
            "x86_64" => Ok(Arch::X86_64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}
