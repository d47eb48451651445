use thiserror::Error;

/// Result code carried by every [`crate::request::Request`] completion and by
/// synchronous submission failures.
///
/// Mirrors the closed taxonomy of the wire protocol: these four values are
/// stable and never grow new variants, so callers may match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum ReqResult {
    /// The request completed normally.
    #[error("ok")]
    Ok = 0,
    /// The request type is unknown to the driver, or its payload is malformed.
    /// Never retried: this is a programmer error.
    #[error("invalid request")]
    Invalid = 1,
    /// A semantic precondition failed (name collision, missing target, ...).
    /// The caller decides whether to retry with different input.
    #[error("request aborted")]
    Aborted = 2,
    /// Resource exhaustion. The caller may retry after backpressure.
    #[error("out of memory")]
    Nomem = 3,
}

impl ReqResult {
    /// True for [`ReqResult::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, ReqResult::Ok)
    }
}

impl Default for ReqResult {
    fn default() -> Self {
        ReqResult::Ok
    }
}
