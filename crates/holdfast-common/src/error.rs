//! Error types and error codes for Holdfast
//!
//! This module defines:
//! - `LockError`: typed failures of lock operations
//! - `ErrorKind`: the coarse taxonomy used to pick status codes and retry policy
//! - `ErrorCode`: structured error codes for API and realtime responses

use serde::{Deserialize, Serialize};

/// Failures surfaced by the lock manager
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("another actor is currently acquiring this lock")]
    AcquisitionInProgress,

    #[error("record is locked by {holder_name}")]
    HeldByOther { holder_name: String },

    #[error("no lock found for this record")]
    NotFound,

    #[error("lock is not held by this actor")]
    NotOwner,

    #[error("lock renewal not yet allowed, {remaining_ms}ms remaining before expiry")]
    RenewalTooEarly { remaining_ms: i64 },

    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("lock store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("lock cache unavailable: {0}")]
    CacheUnavailable(#[source] anyhow::Error),
}

/// Coarse error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Transient, the caller may retry after backoff
    Contention,
    /// Needs a state change before a retry can succeed
    Conflict,
    NotFound,
    /// A normal negative result of a time check
    PolicyViolation,
    Validation,
    Infrastructure,
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::AcquisitionInProgress => ErrorKind::Contention,
            LockError::HeldByOther { .. } | LockError::NotOwner => ErrorKind::Conflict,
            LockError::NotFound => ErrorKind::NotFound,
            LockError::RenewalTooEarly { .. } => ErrorKind::PolicyViolation,
            LockError::IllegalArgument(_) => ErrorKind::Validation,
            LockError::StoreUnavailable(_) | LockError::CacheUnavailable(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }

    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            LockError::AcquisitionInProgress => LOCK_ACQUISITION_IN_PROGRESS,
            LockError::HeldByOther { .. } => LOCK_HELD_BY_OTHER,
            LockError::NotFound => LOCK_NOT_FOUND,
            LockError::NotOwner => LOCK_NOT_OWNER,
            LockError::RenewalTooEarly { .. } => LOCK_RENEWAL_TOO_EARLY,
            LockError::IllegalArgument(_) => PARAMETER_VALIDATE_ERROR,
            LockError::StoreUnavailable(_) | LockError::CacheUnavailable(_) => {
                SERVICE_UNAVAILABLE
            }
        }
    }

    /// Message safe to show to an end user.
    ///
    /// Infrastructure failures are reported generically; their detail only
    /// goes to the logs.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Infrastructure => SERVICE_UNAVAILABLE.message.to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const PARAMETER_MISSING: ErrorCode<'static> = ErrorCode {
    code: 10000,
    message: "parameter missing",
};

pub const ACCESS_DENIED: ErrorCode<'static> = ErrorCode {
    code: 10001,
    message: "access denied",
};

pub const UNAUTHORIZED: ErrorCode<'static> = ErrorCode {
    code: 10003,
    message: "authentication error",
};

pub const TOO_MANY_REQUESTS: ErrorCode<'static> = ErrorCode {
    code: 10004,
    message: "too many lock attempts, please try again later",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const SERVICE_UNAVAILABLE: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "lock service temporarily unavailable",
};

// Lock errors
pub const LOCK_ACQUISITION_IN_PROGRESS: ErrorCode<'static> = ErrorCode {
    code: 40001,
    message: "lock acquisition in progress",
};

pub const LOCK_HELD_BY_OTHER: ErrorCode<'static> = ErrorCode {
    code: 40002,
    message: "lock held by another actor",
};

pub const LOCK_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 40003,
    message: "lock not found",
};

pub const LOCK_NOT_OWNER: ErrorCode<'static> = ErrorCode {
    code: 40004,
    message: "lock not owned by actor",
};

pub const LOCK_RENEWAL_TOO_EARLY: ErrorCode<'static> = ErrorCode {
    code: 40005,
    message: "lock renewal too early",
};

// Realtime errors
pub const INVALID_RECORD_ID: ErrorCode<'static> = ErrorCode {
    code: 50001,
    message: "invalid record id",
};

pub const INVALID_CURSOR_POSITION: ErrorCode<'static> = ErrorCode {
    code: 50002,
    message: "invalid cursor position",
};

pub const INVALID_EVENT_PAYLOAD: ErrorCode<'static> = ErrorCode {
    code: 50003,
    message: "invalid event payload",
};

pub const LOCK_RELEASE_FAILED: ErrorCode<'static> = ErrorCode {
    code: 50004,
    message: "lock release failed",
};
