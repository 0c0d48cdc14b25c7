//! Custom error types for the application.
//!
//! This module defines the primary error type, `EngineError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the error kinds the system distinguishes:
//! transient-transport, timeout, parameter-coercion, locked-key,
//! resolution-miss, and engine-slip.
//!
//! The motion engine's own frame loop never surfaces `EngineError` to its
//! caller — every failure there self-heals at the next frame and is only
//! logged. `EngineError` is returned by the parameter store, the homing
//! coordinator, and the upstream router, which do hand structured results
//! back to callers.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot coerce '{value}' into the type of parameter '{key}'")]
    ParameterCoercion { key: String, value: String },

    #[error("parameter '{0}' is locked and cannot be mutated")]
    LockedKey(String),

    #[error("unknown mode id '{0}'")]
    UnknownMode(String),

    #[error("{what} timed out after {secs:.1}s")]
    Timeout { what: &'static str, secs: f64 },

    #[error("send to endpoint {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("motor id {0} is out of range")]
    MotorOutOfRange(i64),

    #[error("operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::MotorOutOfRange(99);
        assert_eq!(err.to_string(), "motor id 99 is out of range");
    }

    #[test]
    fn test_parameter_coercion_display() {
        let err = EngineError::ParameterCoercion {
            key: "ALPHA".into(),
            value: "banana".into(),
        };
        assert!(err.to_string().contains("ALPHA"));
        assert!(err.to_string().contains("banana"));
    }

    #[test]
    fn test_timeout_display() {
        let err = EngineError::Timeout {
            what: "homing",
            secs: 21.0,
        };
        assert_eq!(err.to_string(), "homing timed out after 21.0s");
    }
}
