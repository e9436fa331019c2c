//! Error kinds for the resource transfer engine.
//!
//! Mirrors the seven error kinds named in the protocol design: most of them
//! are not returned to a caller at all, they are folded into a resource's
//! terminal `status` and observed through the completion callback. Only
//! construction-time misuse (`LimitExceeded`) and local wire-encoding
//! failures are raised as `Result::Err`.

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ParcelError {
    #[error("transient send/serialize failure: {0}")]
    Transient(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("integrity check failed for resource")]
    Integrity,

    #[error("resource was rejected by the receiver")]
    Rejected,

    #[error("resource transfer was cancelled")]
    Cancelled,

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("malformed wire payload: {0}")]
    Codec(String),

    #[error("buffer capacity exceeded")]
    OutOfMemory,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("signature verification failed")]
    IncorrectSignature,

    #[error("cryptographic operation failed")]
    CryptoError,
}

impl ParcelError {
    /// True for kinds that still leave the resource retryable rather than terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

pub type Result<T> = core::result::Result<T, ParcelError>;
