//! Session validation for the catalog service.
//!
//! The catalog core treats identity as an external collaborator: this
//! crate answers exactly two questions. Is the request authenticated, and
//! does the user hold the role that gates mutating endpoints? Token
//! issuance and the OIDC exchange happen elsewhere; only the resulting
//! session JWT is inspected here.

pub mod jwt;
pub mod session;

pub use jwt::{decode_session_token, SessionClaims};
pub use session::{require_role, validate_user_session, AuthConfig, SessionStatus, UserInfo};

use http::StatusCode;
use thiserror::Error;

/// Authentication and authorization failures.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authentication required")]
    Missing,

    #[error("invalid session token: {0}")]
    Invalid(String),

    #[error("session expired")]
    Expired,

    #[error("role {required:?} is required for this operation")]
    Forbidden { required: String },
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Missing | Self::Invalid(_) | Self::Expired => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Stable identifier used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Missing => "missing_token",
            Self::Invalid(_) => "invalid_token",
            Self::Expired => "token_expired",
            Self::Forbidden { .. } => "insufficient_permissions",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::Missing.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Expired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Forbidden {
                required: "catalog-editor".into()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_forbidden_names_the_role() {
        let err = AuthError::Forbidden {
            required: "catalog-editor".into(),
        };
        assert!(err.to_string().contains("catalog-editor"));
        assert_eq!(err.to_json()["error"], "insufficient_permissions");
    }
}
