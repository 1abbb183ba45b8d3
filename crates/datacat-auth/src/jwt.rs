//! Session JWT decoding.

use crate::AuthError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims carried by the session cookie.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (account identifier)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiration time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Roles granted by the identity provider
    #[serde(default)]
    pub roles: Vec<String>,
    /// Anything else the provider put in the token
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Decode and validate a session token against the shared HMAC secret.
pub fn decode_session_token(token: &str, secret: &str) -> Result<SessionClaims, AuthError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_aud = false;

    let data = decode::<SessionClaims>(token, &key, &validation).map_err(map_jwt_error)?;
    Ok(data.claims)
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Invalid(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn make_token(claims: &SessionClaims, secret: &str) -> String {
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&Header::default(), claims, &key).unwrap()
    }

    fn future_exp() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + 3600
    }

    #[test]
    fn test_round_trip() {
        let claims = SessionClaims {
            sub: Some("user-1".into()),
            exp: Some(future_exp()),
            name: Some("Ada".into()),
            roles: vec!["catalog-editor".into()],
            extra: HashMap::new(),
        };
        let token = make_token(&claims, "secret");

        let decoded = decode_session_token(&token, "secret").unwrap();
        assert_eq!(decoded.sub.as_deref(), Some("user-1"));
        assert_eq!(decoded.roles, vec!["catalog-editor"]);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let claims = SessionClaims {
            sub: Some("user-1".into()),
            exp: Some(future_exp()),
            name: None,
            roles: vec![],
            extra: HashMap::new(),
        };
        let token = make_token(&claims, "secret");
        assert!(matches!(
            decode_session_token(&token, "other"),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let claims = SessionClaims {
            sub: Some("user-1".into()),
            exp: Some(1_000_000),
            name: None,
            roles: vec![],
            extra: HashMap::new(),
        };
        let token = make_token(&claims, "secret");
        assert!(matches!(
            decode_session_token(&token, "secret"),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_garbage_token() {
        assert!(matches!(
            decode_session_token("not.a.jwt", "secret"),
            Err(AuthError::Invalid(_))
        ));
    }
}
