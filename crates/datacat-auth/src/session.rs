//! Request-level session validation and role gating.

use crate::jwt::decode_session_token;
use crate::AuthError;
use http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// What the auth layer needs to know, lifted from application config.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Session JWT HMAC secret. Without it every request is anonymous.
    pub jwt_secret: Option<String>,
    /// Session cookie namespace; the cookie is `<prefix>session`.
    pub cookie_prefix: String,
    /// Role required for mutating endpoints; `None` means any
    /// authenticated user passes.
    pub required_role: Option<String>,
}

/// The authenticated principal.
#[derive(Clone, Debug, Serialize)]
pub struct UserInfo {
    pub subject: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub claims: HashMap<String, serde_json::Value>,
}

/// Result of inspecting a request's credentials.
#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub is_authenticated: bool,
    pub user: Option<UserInfo>,
}

impl SessionStatus {
    fn anonymous() -> Self {
        Self {
            is_authenticated: false,
            user: None,
        }
    }
}

/// Inspect a request's session cookie (or bearer token) and report who is
/// calling. Never fails: bad credentials just mean anonymous.
pub fn validate_user_session(headers: &HeaderMap, config: &AuthConfig) -> SessionStatus {
    let Some(token) = extract_token(headers, &config.cookie_prefix) else {
        return SessionStatus::anonymous();
    };

    let Some(secret) = &config.jwt_secret else {
        warn!("session token presented but no JWT secret is configured");
        return SessionStatus::anonymous();
    };

    match decode_session_token(&token, secret) {
        Ok(claims) => SessionStatus {
            is_authenticated: true,
            user: Some(UserInfo {
                subject: claims.sub.unwrap_or_default(),
                name: claims.name,
                roles: claims.roles,
                claims: claims.extra,
            }),
        },
        Err(e) => {
            debug!(error = %e, "session token rejected");
            SessionStatus::anonymous()
        }
    }
}

/// Gate for mutating endpoints: authenticated, and holding the required
/// role when one is configured.
pub fn require_role<'a>(
    status: &'a SessionStatus,
    required: Option<&str>,
) -> Result<&'a UserInfo, AuthError> {
    let user = status.user.as_ref().ok_or(AuthError::Missing)?;
    match required {
        None => Ok(user),
        Some(role) if user.roles.iter().any(|r| r == role) => Ok(user),
        Some(role) => Err(AuthError::Forbidden {
            required: role.to_string(),
        }),
    }
}

/// Pull the session token from `Authorization: Bearer` or the namespaced
/// session cookie.
fn extract_token(headers: &HeaderMap, cookie_prefix: &str) -> Option<String> {
    if let Some(auth) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    let cookie_name = format!("{}session", cookie_prefix);
    for value in headers.get_all(http::header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == cookie_name {
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}
