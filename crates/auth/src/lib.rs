use http::HeaderMap;
use http::header;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

/// The identity a verified bearer credential resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Deserialize)]
struct Claims {
    user_id: i64,
    username: String,
    #[allow(dead_code)]
    exp: i64,
}

/// Verifies HS256 bearer tokens signed with a shared secret. Any failure is
/// terminal for the request; identity is never inferred by other means.
#[derive(Clone)]
pub struct TokenAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenAuthenticator {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "token secret must be non-empty".to_string(),
            });
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;

        let decoded = decode::<Claims>(&token, &self.decoding_key, &self.validation).map_err(
            |_| AuthError {
                code: "ERR_AUTH_INVALID",
                message: "token is not valid".to_string(),
            },
        )?;

        let claims = decoded.claims;
        let username = claims.username.trim().to_string();
        if username.is_empty() {
            return Err(AuthError {
                code: "ERR_AUTH_INVALID",
                message: "token username claim is empty".to_string(),
            });
        }

        Ok(Identity {
            user_id: claims.user_id,
            username,
        })
    }
}

/// Coarse machine-to-machine authentication for the save-result path: the
/// `x-api-key` header must equal the configured secret.
pub fn validate_api_key(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing api key".to_string(),
        })?;

    if provided != expected {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "invalid api key".to_string(),
        });
    }

    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing Authorization header".to_string(),
        })?;

    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Authorization must be a Bearer token".to_string(),
        })?;

    if token.trim().is_empty() {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Bearer token is empty".to_string(),
        });
    }

    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";

    fn mint(user_id: i64, username: &str, exp_offset_secs: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be past the epoch")
            .as_secs() as i64;
        let claims = serde_json::json!({
            "user_id": user_id,
            "username": username,
            "exp": now + exp_offset_secs,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("token should encode")
    }

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .expect("header value should be valid"),
        );
        headers
    }

    #[test]
    fn authenticate_resolves_identity_from_valid_token() {
        let gate = TokenAuthenticator::new(SECRET).expect("authenticator should build");
        let token = mint(7, "ada", 3600);

        let identity = gate
            .authenticate(&headers_with_bearer(&token))
            .expect("valid token should authenticate");
        assert_eq!(
            identity,
            Identity {
                user_id: 7,
                username: "ada".to_string(),
            }
        );
    }

    #[test]
    fn authenticate_rejects_expired_token() {
        let gate = TokenAuthenticator::new(SECRET).expect("authenticator should build");
        let token = mint(7, "ada", -3600);

        let err = gate
            .authenticate(&headers_with_bearer(&token))
            .unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }

    #[test]
    fn authenticate_rejects_wrong_secret() {
        let gate = TokenAuthenticator::new("other-secret").expect("authenticator should build");
        let token = mint(7, "ada", 3600);

        let err = gate
            .authenticate(&headers_with_bearer(&token))
            .unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }

    #[test]
    fn bearer_token_rejects_missing_header() {
        let headers = HeaderMap::new();
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_REQUIRED");
    }

    #[test]
    fn bearer_token_rejects_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }

    #[test]
    fn api_key_is_compared_against_configured_secret() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            validate_api_key(&headers, "k1").unwrap_err().code,
            "ERR_AUTH_REQUIRED"
        );

        headers.insert("x-api-key", HeaderValue::from_static("wrong"));
        assert_eq!(
            validate_api_key(&headers, "k1").unwrap_err().code,
            "ERR_AUTH_INVALID"
        );

        headers.insert("x-api-key", HeaderValue::from_static("k1"));
        assert!(validate_api_key(&headers, "k1").is_ok());
    }
}
