//! Room access tokens
//!
//! The recorder joins as a hidden participant that subscribes but never
//! publishes. Tokens are HS256 JWTs signed with the API secret.

use crate::utils::error::RecorderResult;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Room permissions carried in the `video` claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
    pub hidden: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

/// JWT claims understood by the room service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

/// Issues join tokens for the recorder identity
#[derive(Debug, Clone)]
pub struct AccessToken {
    api_key: String,
    api_secret: String,
    identity: String,
    ttl: chrono::Duration,
}

impl AccessToken {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        identity: impl Into<String>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            identity: identity.into(),
            ttl: chrono::Duration::seconds(ttl_secs),
        }
    }

    /// Claims granting a hidden, subscribe-only join of `room`
    pub fn claims(&self, room: &str) -> TokenClaims {
        let now = chrono::Utc::now();
        TokenClaims {
            iss: self.api_key.clone(),
            sub: self.identity.clone(),
            nbf: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            video: VideoGrant {
                room_join: true,
                room: room.to_string(),
                hidden: true,
                can_publish: false,
                can_subscribe: true,
            },
        }
    }

    pub fn to_jwt(&self, room: &str) -> RecorderResult<String> {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &self.claims(room),
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Verify a token issued with this key pair
    pub fn verify(&self, token: &str) -> RecorderResult<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.api_key.as_str()]);
        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.api_secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }
}
