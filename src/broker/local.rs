//! In-process backplane and membership store.
//!
//! Backs single-instance deployments and the test suite: a room's
//! broadcast domain is a `tokio` broadcast channel instead of a broker
//! channel, and membership is a plain set. The contracts hold unchanged:
//! a subscriber observes its own publishes and relies on self-send
//! suppression exactly as with the Redis backplane.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use futures::StreamExt as _;
use iris_client_api_proto::{RoomId, ServerMsg, UserId};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{
    Backplane, BrokerError, BrokerEvent, MembershipStore, Subscription,
};

/// Frames buffered per room channel before a lagging subscriber starts
/// losing messages.
const CHANNEL_CAPACITY: usize = 256;

/// In-process [`Backplane`] and [`MembershipStore`].
#[derive(Debug, Default)]
pub struct LocalBroker {
    channels: Mutex<HashMap<RoomId, broadcast::Sender<String>>>,
    members: Mutex<HashMap<RoomId, HashSet<UserId>>>,
}

impl LocalBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, room: &RoomId) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .unwrap()
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Backplane for LocalBroker {
    async fn publish(
        &self,
        room: &RoomId,
        msg: &ServerMsg,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(msg)?;
        // An empty room has no receivers; that is not a failure.
        let _ = self.channel(room).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        room: &RoomId,
    ) -> Result<Subscription, BrokerError> {
        let rx = self.channel(room).subscribe();
        let stream = BroadcastStream::new(rx)
            .filter_map(|msg| async move { msg.ok().map(BrokerEvent) });
        Ok(Subscription::new(Box::pin(stream), None))
    }
}

#[async_trait]
impl MembershipStore for LocalBroker {
    async fn add_member(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<(), BrokerError> {
        self.members
            .lock()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .insert(user.clone());
        Ok(())
    }

    async fn remove_member(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<(), BrokerError> {
        let mut members = self.members.lock().unwrap();
        if let Some(room_members) = members.get_mut(room) {
            room_members.remove(user);
            if room_members.is_empty() {
                members.remove(room);
            }
        }
        Ok(())
    }

    async fn members(
        &self,
        room: &RoomId,
    ) -> Result<Vec<UserId>, BrokerError> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;
    use iris_client_api_proto::{ChatMessage, PresenceEvent};

    use super::*;

    fn presence(user: &str) -> ServerMsg {
        ServerMsg::UserJoined(PresenceEvent {
            user_id: UserId::from(user),
            user_name: "N".to_owned(),
            user_photo: "P".to_owned(),
            sender: UserId::from(user),
        })
    }

    #[tokio::test]
    async fn subscriber_observes_every_publish_including_its_own() {
        let broker = LocalBroker::new();
        let room = RoomId::from("r1");

        let mut sub = broker.subscribe(&room).await.unwrap();
        let mut stream = sub.take_stream().unwrap();

        broker.publish(&room, &presence("u1")).await.unwrap();
        broker
            .publish(
                &room,
                &ServerMsg::ChatMessage(ChatMessage {
                    id: None,
                    text: "hi".to_owned(),
                    time: None,
                    user: None,
                    sender: Some(UserId::from("u1")),
                }),
            )
            .await
            .unwrap();

        let first: ServerMsg =
            serde_json::from_str(&stream.next().await.unwrap().0).unwrap();
        let second: ServerMsg =
            serde_json::from_str(&stream.next().await.unwrap().0).unwrap();

        assert_eq!(first.sender(), Some(&UserId::from("u1")));
        assert!(matches!(second, ServerMsg::ChatMessage(_)));
    }

    #[tokio::test]
    async fn publish_into_empty_room_is_not_an_error() {
        let broker = LocalBroker::new();

        broker
            .publish(&RoomId::from("empty"), &presence("u1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn membership_add_remove_round_trips() {
        let broker = LocalBroker::new();
        let room = RoomId::from("r1");
        let user = UserId::from("u1");

        broker.add_member(&room, &user).await.unwrap();
        broker.add_member(&room, &user).await.unwrap();
        assert_eq!(broker.members(&room).await.unwrap(), vec![user.clone()]);

        broker.remove_member(&room, &user).await.unwrap();
        broker.remove_member(&room, &user).await.unwrap();
        assert!(broker.members(&room).await.unwrap().is_empty());
    }
}
