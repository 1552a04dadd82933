//! In-process reference implementation of the storage contracts.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use iris_client_api_proto::{RoomId, UserId};

use super::{
    AuthSession, Room, RoomRepository, SessionRepository, StorageError, User,
    UserRepository,
};

/// In-memory [`RoomRepository`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryRooms(Arc<RwLock<HashMap<RoomId, Room>>>);

impl InMemoryRooms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRepository for InMemoryRooms {
    async fn get(&self, id: &RoomId) -> Result<Option<Room>, StorageError> {
        Ok(self.0.read().unwrap().get(id).cloned())
    }

    async fn create(&self, room: Room) -> Result<(), StorageError> {
        self.0.write().unwrap().insert(room.id.clone(), room);
        Ok(())
    }
}

/// In-memory [`UserRepository`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryUsers(Arc<RwLock<HashMap<UserId, User>>>);

impl InMemoryUsers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn get(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        Ok(self.0.read().unwrap().get(id).cloned())
    }

    async fn get_by_email(
        &self,
        email: &str,
    ) -> Result<Option<User>, StorageError> {
        Ok(self
            .0
            .read()
            .unwrap()
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn create(&self, user: User) -> Result<(), StorageError> {
        let mut users = self.0.write().unwrap();
        if !user.email.is_empty()
            && users.values().any(|u| u.email == user.email)
        {
            return Err(StorageError::Conflict);
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }
}

/// In-memory [`SessionRepository`].
#[derive(Clone, Debug, Default)]
pub struct InMemorySessions(Arc<RwLock<HashMap<UserId, AuthSession>>>);

impl InMemorySessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessions {
    async fn put(&self, session: AuthSession) -> Result<(), StorageError> {
        self.0
            .write()
            .unwrap()
            .insert(session.user_id.clone(), session);
        Ok(())
    }

    async fn get(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuthSession>, StorageError> {
        Ok(self.0.read().unwrap().get(user_id).cloned())
    }

    async fn remove(&self, user_id: &UserId) -> Result<(), StorageError> {
        self.0.write().unwrap().remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let users = InMemoryUsers::new();
        users
            .create(User::new(
                UserId::from("u1"),
                "a@test".to_owned(),
                "hash".to_owned(),
            ))
            .await
            .unwrap();

        let duplicate = users
            .create(User::new(
                UserId::from("u2"),
                "a@test".to_owned(),
                "hash".to_owned(),
            ))
            .await;

        assert!(matches!(duplicate, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn placeholder_users_do_not_conflict() {
        let users = InMemoryUsers::new();
        users
            .create(User::placeholder(UserId::from("u1")))
            .await
            .unwrap();
        users
            .create(User::placeholder(UserId::from("u2")))
            .await
            .unwrap();

        assert!(users.get(&UserId::from("u2")).await.unwrap().is_some());
    }

    #[test]
    fn user_name_is_derived_from_email() {
        let user = User::new(
            UserId::from("u1"),
            "alice@test".to_owned(),
            "hash".to_owned(),
        );
        assert_eq!(user.user_name, "alice");

        let odd = User::new(
            UserId::from("u2"),
            "@test".to_owned(),
            "hash".to_owned(),
        );
        assert_eq!(odd.user_name, "Anonymous");
    }
}
