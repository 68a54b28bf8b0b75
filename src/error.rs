//! Error types for the fileforge orchestration core.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EngineError`] — a failure of the current request. Everything below
//!   the session state machine is caught and converted into one of these
//!   variants before it can reach the transport boundary; nothing
//!   propagates to the host as an unhandled fault.
//!
//! * [`ConversionCause`] — the typed reason a conversion failed, carried
//!   inside [`EngineError::ConversionFailed`]. Callers can distinguish a
//!   stuck external converter (timeout) from a converter that ran and
//!   rejected the input.
//!
//! `InputRejected` (and its size/parameter siblings) is the recoverable
//! family: the user is re-prompted and the session state is left untouched.
//! Every other variant clears the session back to `Idle` so the user is
//! never stuck mid-workflow.

use crate::request::{ConversionKind, InputClass};
use std::path::PathBuf;
use thiserror::Error;

/// All failures surfaced by the orchestration core.
///
/// Each variant maps to exactly one user-visible notice; the mapping lives
/// in [`crate::engine`].
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Recoverable input errors ──────────────────────────────────────────
    /// The input does not fit the current workflow state. The session is
    /// left unchanged and the user is re-prompted.
    #[error("input rejected: expected {expected}, got {got}")]
    InputRejected {
        expected: InputClass,
        got: InputClass,
    },

    /// A file exceeded the configured size limit before any scratch write.
    #[error("file '{name}' is {size} bytes, limit is {limit}")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// Free-text parameter did not match the expected grammar.
    #[error("parameter '{text}' does not match expected form '{example}'")]
    ParameterInvalid { text: String, example: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The external converter failed or timed out. The session is cleared
    /// and all scratch artifacts are removed.
    #[error("conversion {kind} failed: {cause}")]
    ConversionFailed {
        kind: ConversionKind,
        cause: ConversionCause,
    },

    // ── Delivery errors ───────────────────────────────────────────────────
    /// Output was produced but the transport could not send it. No retry;
    /// the caller surfaces the failure and cleanup still runs.
    #[error("delivery to chat {target} failed: {reason}")]
    DeliveryFailed { target: i64, reason: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Scratch allocation or write failed. Fatal to the current request;
    /// the session is cleared and the user is told to retry.
    #[error("scratch storage fault at '{path}': {source}")]
    StorageFault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Invariant violations ──────────────────────────────────────────────
    /// A state the session machine's closed enums should make unreachable.
    /// Logged loudly, the request fails safe, the process does not crash.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Why a conversion request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ConversionCause {
    /// The adapter exceeded the configured wall-clock limit. Partial
    /// outputs are cleaned by the owning scratch guard.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The adapter ran and reported an error.
    #[error("{detail}")]
    Adapter { detail: String },

    /// The adapter produced no output artifacts despite reporting success.
    #[error("adapter returned no output")]
    EmptyOutput,
}

impl EngineError {
    /// Whether the failure leaves the session state untouched (`true`) or
    /// forces it back to `Idle` (`false`).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InputRejected { .. }
                | EngineError::FileTooLarge { .. }
                | EngineError::ParameterInvalid { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_failed_display() {
        let e = EngineError::ConversionFailed {
            kind: ConversionKind::ImagesToPdf,
            cause: ConversionCause::Timeout { secs: 30 },
        };
        let msg = e.to_string();
        assert!(msg.contains("images_to_pdf"), "got: {msg}");
        assert!(msg.contains("30s"), "got: {msg}");
    }

    #[test]
    fn input_rejected_is_recoverable() {
        let e = EngineError::InputRejected {
            expected: InputClass::Pdf,
            got: InputClass::Image,
        };
        assert!(e.is_recoverable());
    }

    #[test]
    fn storage_fault_is_not_recoverable() {
        let e = EngineError::StorageFault {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::other("disk full"),
        };
        assert!(!e.is_recoverable());
        assert!(e.to_string().contains("/tmp/x"));
    }

    #[test]
    fn parameter_invalid_shows_example() {
        let e = EngineError::ParameterInvalid {
            text: "big".into(),
            example: "800x600".into(),
        };
        assert!(e.to_string().contains("800x600"));
    }
}
