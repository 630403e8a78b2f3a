//! Simulator lifecycle states.

use std::fmt;

/// State of a simulator as persisted in its `device.plist`.
///
/// The on-disk plist is the single source of truth; any in-memory copy is
/// advisory and must be re-read before acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimState {
    Creating,
    Shutdown,
    Booted,
    Unknown,
}

impl SimState {
    /// Maps the integer state code stored in `device.plist`.
    pub fn from_plist_code(code: i64) -> SimState {
        match code {
            0 => SimState::Creating,
            1 => SimState::Shutdown,
            3 => SimState::Booted,
            _ => SimState::Unknown,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SimState::Creating => "Creating",
            SimState::Shutdown => "Shutdown",
            SimState::Booted => "Booted",
            SimState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plist_codes_map_to_states() {
        assert_eq!(SimState::from_plist_code(0), SimState::Creating);
        assert_eq!(SimState::from_plist_code(1), SimState::Shutdown);
        assert_eq!(SimState::from_plist_code(3), SimState::Booted);
        assert_eq!(SimState::from_plist_code(2), SimState::Unknown);
        assert_eq!(SimState::from_plist_code(42), SimState::Unknown);
    }
}
