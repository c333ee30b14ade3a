use axum::http::{header, HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub const MERCHANT_AUDIENCE: &str = "merchant";

/// Verifies merchant bearer tokens (HS256).
///
/// Expiry and not-before are checked against the caller's clock instead of the system time.
#[derive(Clone)]
pub struct MerchantTokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl MerchantTokenValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Returns the merchant's user id when the token is valid at `now`.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = decode::<MerchantClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(format!("{err}")))?
            .claims;

        if claims.aud != MERCHANT_AUDIENCE {
            return Err(TokenError::Invalid("audience_mismatch".to_string()));
        }
        if claims.sub.trim().is_empty() {
            return Err(TokenError::Invalid("missing_subject".to_string()));
        }
        let now_ts = now.timestamp();
        if let Some(nbf) = claims.nbf {
            if now_ts < nbf as i64 {
                return Err(TokenError::Invalid("token_not_yet_valid".to_string()));
            }
        }
        if now_ts >= claims.exp as i64 {
            return Err(TokenError::Invalid("token_expired".to_string()));
        }
        Ok(claims.sub)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MerchantClaims {
    pub sub: String,
    pub aud: String,
    pub exp: usize,
    #[serde(default)]
    pub nbf: Option<usize>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Extracts the authenticated merchant from the `Authorization` header.
pub fn require_merchant(state: &AppState, headers: &HeaderMap) -> Result<String, ProblemResponse> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "missing_token",
                "a merchant bearer token is required",
            )
        })?;

    state
        .token_validator()
        .validate(token, state.now())
        .map_err(|err| {
            warn!(stage = "auth", error = %err, "merchant token rejected");
            ProblemResponse::new(StatusCode::FORBIDDEN, "invalid_token", err.to_string())
        })
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &[u8], user_id: &str, exp: DateTime<Utc>) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = MerchantClaims {
        sub: user_id.to_string(),
        aud: MERCHANT_AUDIENCE.to_string(),
        exp: exp.timestamp() as usize,
        nbf: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).expect("encode token")
}
