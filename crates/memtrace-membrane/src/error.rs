//! Tracer error types.

use thiserror::Error;

/// Errors raised by the tracer itself.
///
/// Misuse by the traced program (illegal or double free) is not an error
/// here; it is a [`FreeOutcome`](crate::tracer::FreeOutcome) variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// A real allocator entry point could not be resolved. Forwarding is
    /// impossible, so the host process must not continue.
    #[error("cannot resolve real allocator entry point `{symbol}`: {reason}")]
    Binding { symbol: &'static str, reason: String },
    /// `malloc(0)` under [`ZeroSizePolicy::Abort`](crate::config::ZeroSizePolicy::Abort).
    #[error("zero-size allocation request")]
    ZeroSizeRequest,
    /// The lifecycle was asked to start twice.
    #[error("tracer is already active")]
    AlreadyActive,
    /// The lifecycle was asked to stop while not active.
    #[error("tracer is not active (phase: {0})")]
    NotActive(&'static str),
}

impl TraceError {
    /// True if the host process has to be terminated.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Binding { .. } | Self::ZeroSizeRequest)
    }
}
