// Service-level error taxonomy shared by the user and auth services.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure of a service operation. The HTTP layer maps each variant to a
/// status code; the message is safe to show to clients except for
/// `Internal`, whose cause is only logged.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input rejected by a business rule (duplicate username, weak password...).
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Short machine-readable kind, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn internal_wraps_anyhow_chain() {
        let err: ServiceError = anyhow!("disk full").context("failed to insert user").into();
        assert_eq!(err.kind(), "internal_error");
        assert!(err.to_string().contains("failed to insert user"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn validation_message_is_verbatim() {
        let err = ServiceError::validation("Username 'bob' already exists");
        assert_eq!(err.to_string(), "Username 'bob' already exists");
        assert_eq!(err.kind(), "validation_error");
    }
}
