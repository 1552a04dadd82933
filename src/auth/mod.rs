//! Authentication: password credentials and JWT issuance.

use std::sync::Arc;

use chrono::{Duration as TokenTtl, Utc};
use derive_more::{Display, From};
use jsonwebtoken::{
    decode, encode, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq as _;
use uuid::Uuid;

use iris_client_api_proto::UserId;

use crate::{
    conf,
    storage::{
        AuthSession, SessionRepository, StorageError, User, UserRepository,
    },
};

/// Claims carried by Iris access and refresh tokens.
#[derive(Debug, Deserialize, Serialize)]
pub struct Claims {
    /// Authenticated user ID.
    pub sub: String,

    /// Expiration, seconds since Unix epoch.
    pub exp: usize,

    /// Issue time, seconds since Unix epoch.
    pub iat: usize,

    /// Unique token ID, so two tokens of the same subject never collide.
    pub jti: String,
}

/// Errors of [`AuthService`] operations.
#[derive(Debug, Display, From)]
pub enum AuthError {
    /// Credentials are missing, malformed, expired or simply wrong.
    #[display(fmt = "invalid credentials")]
    Unauthorized,

    /// A user with the same email is already registered.
    #[display(fmt = "registration failed")]
    EmailTaken,

    /// Backing store failed the operation.
    #[display(fmt = "storage unavailable: {}", _0)]
    Storage(StorageError),

    /// Hashing or token signing failed.
    #[display(fmt = "internal error")]
    Internal,
}

/// Freshly issued access + refresh token pair.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues and verifies the credentials of the service: Argon2 password
/// hashes and HS256 JWTs with the authenticated user ID as subject.
#[derive(Clone)]
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_token_ttl: TokenTtl,
    refresh_token_ttl: TokenTtl,
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
}

impl AuthService {
    /// Creates a new [`AuthService`] signing tokens with the configured
    /// secret.
    #[must_use]
    pub fn new(
        conf: &conf::Auth,
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(conf.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(conf.jwt_secret.as_bytes()),
            access_token_ttl: TokenTtl::from_std(conf.access_token_ttl)
                .unwrap_or_else(|_| TokenTtl::minutes(15)),
            refresh_token_ttl: TokenTtl::from_std(conf.refresh_token_ttl)
                .unwrap_or_else(|_| TokenTtl::days(7)),
            users,
            sessions,
        }
    }

    /// Registers a new user with the provided credentials and issues its
    /// first token pair.
    ///
    /// # Errors
    ///
    /// Errors with [`AuthError::EmailTaken`] when the email is already
    /// registered.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(User, TokenPair), AuthError> {
        if self.users.get_by_email(email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let salt: [u8; 16] = rand::random();
        let hash = argon2::hash_encoded(
            password.as_bytes(),
            &salt,
            &argon2::Config::default(),
        )
        .map_err(|_| AuthError::Internal)?;

        let user =
            User::new(UserId(Uuid::new_v4().to_string()), email.to_owned(), hash);
        match self.users.create(user.clone()).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        }

        let tokens = self.issue_tokens(&user.id).await?;
        Ok((user, tokens))
    }

    /// Verifies the provided credentials and issues a new token pair.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(User, TokenPair), AuthError> {
        let user = self
            .users
            .get_by_email(email)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        let verified =
            argon2::verify_encoded(&user.password_hash, password.as_bytes())
                .unwrap_or(false);
        if !verified {
            return Err(AuthError::Unauthorized);
        }

        let tokens = self.issue_tokens(&user.id).await?;
        Ok((user, tokens))
    }

    /// Exchanges a valid refresh token for a new access token.
    ///
    /// The presented token must verify, match the recorded one for its
    /// subject (compared in constant time) and not be expired.
    pub async fn refresh(
        &self,
        refresh_token: &str,
    ) -> Result<String, AuthError> {
        let user_id = self.verify(refresh_token)?;
        let session = self
            .sessions
            .get(&user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let matches: bool = session
            .refresh_token
            .as_bytes()
            .ct_eq(refresh_token.as_bytes())
            .into();
        if !matches || session.expires_at < Utc::now() {
            return Err(AuthError::Unauthorized);
        }

        self.sign(&user_id, self.access_token_ttl)
    }

    /// Verifies a token and returns its subject.
    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| UserId(data.claims.sub))
            .map_err(|_| AuthError::Unauthorized)
    }

    /// Issues an access token for the provided user.
    pub fn access_token(&self, user: &UserId) -> Result<String, AuthError> {
        self.sign(user, self.access_token_ttl)
    }

    async fn issue_tokens(
        &self,
        user: &UserId,
    ) -> Result<TokenPair, AuthError> {
        let access_token = self.sign(user, self.access_token_ttl)?;
        let refresh_token = self.sign(user, self.refresh_token_ttl)?;

        let now = Utc::now();
        self.sessions
            .put(AuthSession {
                user_id: user.clone(),
                refresh_token: refresh_token.clone(),
                expires_at: now + self.refresh_token_ttl,
                created_at: now,
            })
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    fn sign(&self, user: &UserId, ttl: TokenTtl) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.0.clone(),
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|_| AuthError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::memory::{InMemorySessions, InMemoryUsers};

    use super::*;

    fn service() -> AuthService {
        AuthService::new(
            &conf::Auth::default(),
            Arc::new(InMemoryUsers::new()),
            Arc::new(InMemorySessions::new()),
        )
    }

    #[test]
    fn issued_token_verifies_back_to_its_subject() {
        let auth = service();
        let user = UserId::from("u1");

        let token = auth.access_token(&user).unwrap();

        assert_eq!(auth.verify(&token).unwrap(), user);
    }

    #[test]
    fn foreign_token_is_rejected() {
        let auth = service();
        let foreign = AuthService::new(
            &conf::Auth {
                jwt_secret: "other".to_owned(),
                ..conf::Auth::default()
            },
            Arc::new(InMemoryUsers::new()),
            Arc::new(InMemorySessions::new()),
        );

        let token = foreign.access_token(&UserId::from("u1")).unwrap();

        assert!(matches!(
            auth.verify(&token),
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            auth.verify("not-even-a-jwt"),
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn register_then_login() {
        let auth = service();

        let (user, _) = auth.register("alice@test", "s3cret").await.unwrap();
        assert_eq!(user.user_name, "alice");

        let (logged_in, tokens) =
            auth.login("alice@test", "s3cret").await.unwrap();
        assert_eq!(logged_in.id, user.id);
        assert_eq!(auth.verify(&tokens.access_token).unwrap(), user.id);

        assert!(matches!(
            auth.login("alice@test", "wrong").await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            auth.register("alice@test", "again").await,
            Err(AuthError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn refresh_requires_the_recorded_token() {
        let auth = service();
        let (user, tokens) =
            auth.register("bob@test", "s3cret").await.unwrap();

        let access = auth.refresh(&tokens.refresh_token).await.unwrap();
        assert_eq!(auth.verify(&access).unwrap(), user.id);

        // A verifiable token that is not the recorded one is refused.
        let (_, newer) = auth.login("bob@test", "s3cret").await.unwrap();
        assert!(newer.refresh_token != tokens.refresh_token);
        assert!(matches!(
            auth.refresh(&tokens.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));
        auth.refresh(&newer.refresh_token).await.unwrap();
    }
}
