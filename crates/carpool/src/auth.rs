use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use model::{session::Session, user::User, WithId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    database::{Database, SessionRepo as _, UserRepo as _},
    error::{Error, Result},
};

const ACCESS_TTL_MIN: i64 = 15;
const REFRESH_TTL_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn mint_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Issues and rotates tokens. Access tokens are short-lived JWTs; refresh
/// tokens are random values stored only as a SHA-256 hash and rotated on
/// every use, so a presented token that no longer resolves is treated as a
/// possible replay.
#[derive(Clone)]
pub struct AuthService<D: Database> {
    database: D,
    jwt_secret: String,
}

impl<D: Database> AuthService<D> {
    pub fn new(database: D, jwt_secret: String) -> Self {
        Self {
            database,
            jwt_secret,
        }
    }

    fn encode_access(&self, user_id: &str, role: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_owned(),
            role: role.to_owned(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ACCESS_TTL_MIN)).timestamp(),
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(Error::internal)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims> {
        jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| Error::Authentication("invalid access token".to_owned()))
    }

    /// Creates a session and returns the initial token pair.
    pub async fn issue(&self, user: &WithId<User>) -> Result<TokenPair> {
        let now = Utc::now();
        let refresh_token = mint_refresh_token();
        let session = Session {
            user_id: user.id.clone(),
            refresh_token_hash: hash_token(&refresh_token),
            expires_at: now + Duration::days(REFRESH_TTL_DAYS),
            last_accessed: now,
            active: true,
        };
        self.database.auto().insert_session(session).await?;
        Ok(TokenPair {
            access_token: self.encode_access(
                &user.id.raw(),
                user.content.role.as_str(),
                now,
            )?,
            refresh_token,
        })
    }

    /// Rotates a refresh token. The stored hash is overwritten in the same
    /// guarded UPDATE that checks the old hash, so two concurrent refreshes
    /// of the same token produce exactly one winner.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let now = Utc::now();
        let old_hash = hash_token(refresh_token);
        let session = self
            .database
            .auto()
            .session_by_token_hash(&old_hash)
            .await?
            .ok_or_else(|| {
                // unknown token: either expired-and-purged or a replay of a
                // rotated token
                Error::Authentication("refresh token not recognised".to_owned())
            })?;
        if !session.content.is_usable(now) {
            return Err(Error::Authentication("session expired".to_owned()));
        }
        let user = self.database.auto().get_user(&session.content.user_id).await?;

        let next_token = mint_refresh_token();
        let rotated = self
            .database
            .auto()
            .rotate_session(
                &session.id,
                &old_hash,
                &hash_token(&next_token),
                now + Duration::days(REFRESH_TTL_DAYS),
                now,
            )
            .await?;
        if rotated == 0 {
            return Err(Error::Authentication(
                "refresh token already rotated".to_owned(),
            ));
        }

        Ok(TokenPair {
            access_token: self.encode_access(
                &session.content.user_id.raw(),
                user.content.role.as_str(),
                now,
            )?,
            refresh_token: next_token,
        })
    }

    /// Deactivates the session for a refresh token. Idempotent.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        self.database
            .auto()
            .deactivate_session_by_hash(&hash_token(refresh_token))
            .await?;
        Ok(())
    }

    /// Cooperative cleanup of expired sessions, invoked by cron.
    pub async fn purge_expired(&self) -> Result<u64> {
        Ok(self
            .database
            .auto()
            .purge_expired_sessions(Utc::now())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_stable_and_opaque() {
        let hash = hash_token("abc");
        assert_eq!(hash, hash_token("abc"));
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, "abc");
    }

    #[test]
    fn refresh_tokens_are_unique() {
        assert_ne!(mint_refresh_token(), mint_refresh_token());
    }
}
