//! Contracts of the relational store consumed by the server.
//!
//! The store itself is an external collaborator: these traits describe the
//! operations the server needs, and [`memory`] provides the in-process
//! reference implementation it runs on out of the box. A deployment backs
//! them with its own database client without touching the rest of the
//! code.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use iris_client_api_proto::{MemberInfo, RoomId, UserId};

/// Avatar URL assigned to materialized placeholder users.
pub const PLACEHOLDER_AVATAR: &str = "https://via.placeholder.com/150";

/// Error of a repository operation.
#[derive(Debug, Display)]
pub enum StorageError {
    /// A record with the same unique key already exists.
    #[display(fmt = "record already exists")]
    Conflict,

    /// Underlying store failed the operation.
    #[display(fmt = "storage unavailable: {}", _0)]
    Unavailable(String),
}

/// Conference room record.
///
/// The signaling core treats it as read-only metadata: rooms are created
/// and deactivated through the HTTP API only.
#[derive(Clone, Debug)]
pub struct Room {
    pub id: RoomId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    /// Participant cap enforced at admission time.
    pub max_participants: usize,
    /// Only active rooms admit new connections.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Creates a new active [`Room`] owned by `owner_id`.
    #[must_use]
    pub fn new(
        id: RoomId,
        owner_id: UserId,
        title: String,
        description: String,
        max_participants: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            title,
            description,
            max_participants,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Registered user record.
#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub user_name: String,
    pub img_url: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Creates a new [`User`] with the provided credentials. The display
    /// name is derived from the email local part.
    #[must_use]
    pub fn new(id: UserId, email: String, password_hash: String) -> Self {
        let user_name = email
            .split('@')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("Anonymous")
            .to_owned();
        Self {
            id,
            email,
            password_hash,
            user_name,
            img_url: PLACEHOLDER_AVATAR.to_owned(),
            created_at: Utc::now(),
        }
    }

    /// Creates a stub record for an authenticated user the store has never
    /// seen, so join payloads referring to it stay well-formed.
    #[must_use]
    pub fn placeholder(id: UserId) -> Self {
        Self {
            id,
            email: String::new(),
            password_hash: String::new(),
            user_name: "Anonymous".to_owned(),
            img_url: PLACEHOLDER_AVATAR.to_owned(),
            created_at: Utc::now(),
        }
    }

    /// Returns the short representation sent in `users-list` snapshots.
    #[must_use]
    pub fn member_info(&self) -> MemberInfo {
        MemberInfo {
            id: self.id.clone(),
            name: self.user_name.clone(),
            img_url: self.img_url.clone(),
        }
    }
}

/// Record of an issued refresh token.
#[derive(Clone, Debug)]
pub struct AuthSession {
    pub user_id: UserId,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Storage of [`Room`] records.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Returns the room with the provided ID, if any.
    async fn get(&self, id: &RoomId) -> Result<Option<Room>, StorageError>;

    /// Persists a new room record.
    async fn create(&self, room: Room) -> Result<(), StorageError>;
}

/// Storage of [`User`] records.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Returns the user with the provided ID, if any.
    async fn get(&self, id: &UserId) -> Result<Option<User>, StorageError>;

    /// Returns the user registered with the provided email, if any.
    async fn get_by_email(
        &self,
        email: &str,
    ) -> Result<Option<User>, StorageError>;

    /// Persists a new user record. Fails with [`StorageError::Conflict`]
    /// when the email is already taken.
    async fn create(&self, user: User) -> Result<(), StorageError>;
}

/// Storage of issued refresh tokens.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Records the refresh token of `session.user_id`, replacing any
    /// previous one.
    async fn put(&self, session: AuthSession) -> Result<(), StorageError>;

    /// Returns the recorded refresh token of the provided user, if any.
    async fn get(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuthSession>, StorageError>;

    /// Removes the recorded refresh token of the provided user.
    async fn remove(&self, user_id: &UserId) -> Result<(), StorageError>;
}
