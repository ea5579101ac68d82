//! Error types for MemOSD
//!
//! This module defines the common error type used throughout the daemon,
//! and the mapping from errors onto the signed per-op result codes carried
//! in reply messages.

use thiserror::Error;

/// Common result type for MemOSD operations
pub type Result<T> = std::result::Result<T, Error>;

// Signed result codes carried on the wire, errno-style.
const ENOENT: i32 = 2;
const EIO: i32 = 5;
const EAGAIN: i32 = 11;
const ENOMEM: i32 = 12;
const EFAULT: i32 = 14;
const EINVAL: i32 = 22;
const EOPNOTSUPP: i32 = 95;
const ETIMEDOUT: i32 = 110;
const EINPROGRESS: i32 = 115;

/// Common error type for MemOSD
#[derive(Debug, Error)]
pub enum Error {
    // Startup errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Wire decode errors: the offending message is dropped, the
    // connection survives.
    #[error("truncated message: need {need} more bytes, {have} available")]
    Truncated { need: usize, have: usize },

    #[error("corrupted message: {0}")]
    Corrupted(String),

    #[error("unsupported struct version: need >= {need}, got {got}")]
    UnsupportedVersion { need: u8, got: u8 },

    // Op execution errors: encoded as the op rval, FAILOK applies.
    #[error("unsupported op {opcode:#06x}")]
    UnsupportedOp { opcode: u16 },

    #[error("object not found")]
    NotFound,

    #[error("out of memory")]
    OutOfMemory,

    #[error("bad address in data segment")]
    BadAddress,

    #[error("resource temporarily unavailable")]
    Retry,

    #[error("operation now in progress")]
    InProgress,

    // Cluster errors
    #[error("cluster map did not converge in time")]
    Timeout,

    #[error("peer reported failure: {0}")]
    Remote(i32),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a corrupted-message error
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Check if this is a wire decode failure
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::Corrupted(_) | Self::UnsupportedVersion { .. }
        )
    }

    /// Check if this error is transient.
    ///
    /// Transient failures are never swallowed by a FAILOK op flag: the
    /// client is expected to retry the whole request.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Retry | Self::InProgress)
    }

    /// Signed result code carried in the per-op `rval` field of a reply
    #[must_use]
    pub fn wire_code(&self) -> i32 {
        match self {
            Self::NotFound => -ENOENT,
            Self::UnsupportedOp { .. } => -EOPNOTSUPP,
            Self::OutOfMemory => -ENOMEM,
            Self::BadAddress => -EFAULT,
            Self::Retry => -EAGAIN,
            Self::InProgress => -EINPROGRESS,
            Self::Timeout => -ETIMEDOUT,
            Self::Remote(code) => *code,
            Self::Io(_) => -EIO,
            Self::InvalidArgument(_)
            | Self::Truncated { .. }
            | Self::Corrupted(_)
            | Self::UnsupportedVersion { .. } => -EINVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(Error::NotFound.wire_code(), -2);
        assert_eq!(Error::UnsupportedOp { opcode: 0x2201 }.wire_code(), -95);
        assert_eq!(Error::OutOfMemory.wire_code(), -12);
        assert_eq!(Error::BadAddress.wire_code(), -14);
        assert_eq!(Error::corrupted("x").wire_code(), -22);
    }

    #[test]
    fn test_decode_predicate() {
        assert!(Error::Truncated { need: 4, have: 0 }.is_decode());
        assert!(Error::corrupted("bad length").is_decode());
        assert!(Error::UnsupportedVersion { need: 2, got: 1 }.is_decode());
        assert!(!Error::NotFound.is_decode());
    }

    #[test]
    fn test_transient_predicate() {
        assert!(Error::Retry.is_transient());
        assert!(Error::InProgress.is_transient());
        assert!(!Error::NotFound.is_transient());
        assert!(!Error::BadAddress.is_transient());
    }
}
