use thiserror::Error;

use crate::database::DatabaseError;

pub type Result<T> = std::result::Result<T, Error>;

/// Service-level error taxonomy. Every variant maps to a stable machine code
/// and an HTTP status; handler layers serialise those and never the inner
/// cause, which is only logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not allowed: {0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("request replayed")]
    IdempotencyReplay,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("not implemented")]
    NotImplemented,

    #[error("missing configuration: {0}")]
    Configuration(String),

    #[error("payment provider not configured")]
    PaymentUnavailable,

    #[error("payment provider error: {0}")]
    Payment(String),

    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn internal<E>(why: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(why))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn machine_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Authentication(_) => "AUTHENTICATION_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Self::IdempotencyReplay => "IDEMPOTENCY_REPLAY",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::PaymentUnavailable => "PAYMENT_UNAVAILABLE",
            Self::Payment(_) => "PAYMENT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Authentication(_) => 401,
            Self::Authorization(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::IdempotencyReplay => 409,
            Self::PreconditionFailed(_) => 412,
            Self::PayloadTooLarge => 413,
            Self::NotImplemented => 501,
            Self::Configuration(_) | Self::PaymentUnavailable => 503,
            Self::Payment(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    /// The message a handler may expose. Internal and payment causes are
    /// replaced with a generic message; the cause goes to the log only.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_owned(),
            Self::Payment(_) => "payment provider error".to_owned(),
            other => other.to_string(),
        }
    }
}

impl From<DatabaseError> for Error {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound => Self::NotFound("record"),
            DatabaseError::Conflict(why) => Self::Conflict(why),
            DatabaseError::IdMissing => {
                Self::Internal("id missing on persisted row".into())
            }
            DatabaseError::Other(why) => Self::Internal(why),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_codes_are_stable() {
        assert_eq!(Error::validation("x").machine_code(), "VALIDATION_ERROR");
        assert_eq!(Error::NotFound("trip").machine_code(), "NOT_FOUND");
        assert_eq!(Error::PaymentUnavailable.http_status(), 503);
        assert_eq!(Error::conflict("seat taken").http_status(), 409);
    }

    #[test]
    fn internal_causes_are_not_exposed() {
        let err = Error::Internal("connection refused to 10.0.0.3".into());
        assert_eq!(err.public_message(), "internal error");
        let err = Error::Payment("stripe said no: sk_live_...".to_owned());
        assert_eq!(err.public_message(), "payment provider error");
    }
}
