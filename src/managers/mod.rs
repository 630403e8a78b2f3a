//! Host-side managers for the Xcode toolchain and simulator devices.

pub mod device;
pub mod profile;
pub mod simulator;
pub mod xcode;

pub use simulator::{NewSimulator, Simulator};
pub use xcode::Xcode;
