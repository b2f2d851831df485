//! # Connect-Token Validation
//!
//! The WebSocket endpoint is parameterized by a bearer-style token
//! (`?auth_token=...`) issued elsewhere. Validation happens before a session
//! is registered: the token must be a well-formed HS256 JWT, unexpired, and
//! carry the user id in its `sub` claim. Token issuance is not this
//! service's concern.

use crate::error::{AgentError, AgentResult};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims this service reads from the connect token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier.
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

/// Validate a connect token and extract the user id.
pub fn authenticate(token: &str, secret_key: &str) -> AgentResult<String> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret_key.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| AgentError::Auth(e.to_string()))?;

    if token_data.claims.sub.is_empty() {
        return Err(AgentError::Auth("token has no subject".to_string()));
    }

    Ok(token_data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, exp_offset_secs: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset_secs) as usize;
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_user_id() {
        let user_id = authenticate(&token("user-42", 3600), SECRET).unwrap();
        assert_eq!(user_id, "user-42");
    }

    #[test]
    fn test_expired_token_rejected() {
        let result = authenticate(&token("user-42", -3600), SECRET);
        assert!(matches!(result, Err(AgentError::Auth(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let result = authenticate(&token("user-42", 3600), "other-secret");
        assert!(matches!(result, Err(AgentError::Auth(_))));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            authenticate("not-a-jwt", SECRET),
            Err(AgentError::Auth(_))
        ));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let result = authenticate(&token("", 3600), SECRET);
        assert!(matches!(result, Err(AgentError::Auth(_))));
    }
}
