//! Utilities module

pub mod command;
pub mod command_executor;
pub mod logger;
pub mod plist;

pub use command::CommandRunner;
pub use command_executor::{CommandExecutor, CommandOutput};
pub use logger::setup_logger;
