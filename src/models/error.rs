//! Error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// Invalid combination of user inputs. Surfaced from Prepare and never
    /// retried.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// The simulator tooling failed. May be converted into a retry by the
    /// failure classifier, otherwise fatal.
    #[error("Simulator error: {0}")]
    Sim(String),

    /// A plist document was malformed or a required field was absent.
    #[error("Plist error: {0}")]
    Plist(String),

    /// Structural misuse of the session API. Programmer error.
    #[error("Xcodebuild test error: {0}")]
    XcodebuildTest(String),

    /// An extracted archive held zero or multiple candidate bundles.
    #[error("Bundle error: {0}")]
    Bundle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RunnerError {
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    pub fn sim(message: impl Into<String>) -> Self {
        Self::Sim(message.into())
    }

    pub fn plist(message: impl Into<String>) -> Self {
        Self::Plist(message.into())
    }

    pub fn xcodebuild_test(message: impl Into<String>) -> Self {
        Self::XcodebuildTest(message.into())
    }

    pub fn bundle(message: impl Into<String>) -> Self {
        Self::Bundle(message.into())
    }
}
