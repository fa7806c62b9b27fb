//! Error types for the frame pipeline and the engine boundary
//!
//! Lifecycle violations (double release, processing after teardown) are
//! programming errors and panic instead of appearing here.

use std::fmt;

use thiserror::Error;

/// Engine entry point that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOperation {
    Init,
    Process,
    DeInit,
}

impl fmt::Display for EngineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineOperation::Init => "init",
            EngineOperation::Process => "process",
            EngineOperation::DeInit => "deInit",
        };
        f.write_str(name)
    }
}

/// Recoverable pipeline errors
#[derive(Debug, Error)]
pub enum MrzError {
    /// The engine configuration failed validation. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A single engine call reported a failure
    #[error("engine {operation} failed (code {code}): {phrase}")]
    EngineCall {
        operation: EngineOperation,
        code: i32,
        phrase: String,
    },

    /// The engine returned a document that is not a detection result
    #[error("malformed detection result: {0}")]
    MalformedResult(#[from] serde_json::Error),

    /// A frame could not be converted into an engine image
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A pipeline thread could not be spawned
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MrzError {
    /// Shorthand for a failed engine call
    pub fn engine(operation: EngineOperation, code: i32, phrase: impl Into<String>) -> Self {
        MrzError::EngineCall {
            operation,
            code,
            phrase: phrase.into(),
        }
    }

    /// Whether this error should abort pipeline construction
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MrzError::Configuration(_)
                | MrzError::Io(_)
                | MrzError::EngineCall {
                    operation: EngineOperation::Init,
                    ..
                }
        )
    }
}

pub type MrzResult<T> = Result<T, MrzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_call_display() {
        let err = MrzError::engine(EngineOperation::Process, 3, "no license");
        assert_eq!(err.to_string(), "engine process failed (code 3): no license");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MrzError::Configuration("gamma".into()).is_fatal());
        assert!(MrzError::engine(EngineOperation::Init, 1, "x").is_fatal());
        assert!(!MrzError::engine(EngineOperation::Process, 1, "x").is_fatal());
        assert!(!MrzError::InvalidFrame("planes".into()).is_fatal());
    }
}
