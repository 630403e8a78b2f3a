//! Test bundle type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of test bundle being run.
///
/// - `Xctest`: unit tests hosted inside the app under test.
/// - `Xcuitest`: UI tests driving the app through a separate runner app.
/// - `LogicTest`: hostless unit tests spawned directly inside a simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum TestType {
    #[value(name = "xctest")]
    Xctest,
    #[value(name = "xcuitest")]
    Xcuitest,
    #[value(name = "logic_test")]
    LogicTest,
}

impl TestType {
    pub fn short_name(&self) -> &'static str {
        match self {
            TestType::Xctest => "xctest",
            TestType::Xcuitest => "xcuitest",
            TestType::LogicTest => "logic_test",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}
