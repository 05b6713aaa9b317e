use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use termgate_common::{Secret, TermgateConfig, TermgateError};

use super::{TokenClaims, TokenVerifier};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    exp: i64,
}

/// HS256 access-token verifier. Also able to mint tokens for the login
/// surface and tests.
pub struct JwtTokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    token_lifetime: chrono::Duration,
}

impl JwtTokenVerifier {
    pub fn new(
        secret: &Secret<String>,
        algorithm: &str,
        expire_minutes: u64,
    ) -> Result<Self, TermgateError> {
        let algorithm: Algorithm =
            algorithm
                .parse()
                .map_err(|_| TermgateError::InvalidConfigValue {
                    name: "ALGORITHM".to_owned(),
                    value: algorithm.to_owned(),
                })?;
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.expose_secret().as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            algorithm,
            token_lifetime: chrono::Duration::minutes(expire_minutes as i64),
        })
    }

    pub fn from_config(config: &TermgateConfig) -> Result<Self, TermgateError> {
        Self::new(
            &config.secret_key,
            &config.algorithm,
            config.access_token_expire_minutes,
        )
    }

    pub fn issue(&self, user_id: &str, username: &str) -> Result<String, TermgateError> {
        let claims = Claims {
            sub: user_id.to_owned(),
            username: username.to_owned(),
            exp: (Utc::now() + self.token_lifetime).timestamp(),
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(TermgateError::other)
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims, TermgateError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::new(self.algorithm))
            .map_err(|_| TermgateError::InvalidToken)?;
        Ok(TokenClaims {
            user_id: data.claims.sub,
            username: data.claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(secret: &str) -> JwtTokenVerifier {
        JwtTokenVerifier::new(&Secret::new(secret.to_owned()), "HS256", 15).unwrap()
    }

    #[tokio::test]
    async fn test_issue_verify_round_trip() {
        let verifier = verifier("test-secret");
        let token = verifier.issue("user-1", "alice").unwrap();
        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn test_rejects_wrong_secret() {
        let token = verifier("secret-a").issue("user-1", "alice").unwrap();
        let result = verifier("secret-b").verify(&token).await;
        assert!(matches!(result, Err(TermgateError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_rejects_expired_token() {
        let verifier = verifier("test-secret");
        let claims = Claims {
            sub: "user-1".to_owned(),
            username: "alice".to_owned(),
            exp: (Utc::now() - chrono::Duration::hours(2)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &verifier.encoding_key,
        )
        .unwrap();
        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(TermgateError::InvalidToken)));
    }

    #[test]
    fn test_unknown_algorithm_is_a_config_error() {
        let result = JwtTokenVerifier::new(&Secret::new("x".to_owned()), "HS999", 15);
        assert!(matches!(
            result,
            Err(TermgateError::InvalidConfigValue { .. })
        ));
    }
}
