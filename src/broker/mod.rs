//! Pub/Sub backplane and cross-instance membership store.
//!
//! A room is a broadcast domain that may span several server instances:
//! every broadcast frame goes through the backplane and comes back to all
//! subscribed sessions (including the publisher's own, which suppresses
//! it). The membership store keeps the shared set of user IDs present in
//! each room.

pub mod local;
pub mod redis;

use async_trait::async_trait;
use derive_more::{Display, From};
use futures::stream::BoxStream;
use iris_client_api_proto::{RoomId, ServerMsg, UserId};
use tokio::sync::oneshot;

/// Raw payload received from a room's broadcast channel.
#[derive(Clone, Debug)]
pub struct BrokerEvent(pub String);

/// Errors of backplane and membership store operations.
#[derive(Debug, Display, From)]
pub enum BrokerError {
    /// Failed to encode a message before publishing it.
    #[display(fmt = "failed to encode message: {}", _0)]
    Encode(serde_json::Error),

    /// Underlying broker command failed.
    #[display(fmt = "broker command failed: {}", _0)]
    Command(::redis::RedisError),

    /// Failed to check out a command connection from the pool.
    #[display(fmt = "broker pool failed: {}", _0)]
    Pool(deadpool_redis::PoolError),

    /// Failed to build the command connection pool.
    #[display(fmt = "broker pool creation failed: {}", _0)]
    CreatePool(deadpool_redis::CreatePoolError),

    /// Operation did not complete within its deadline.
    #[display(fmt = "broker operation timed out")]
    Timeout,
}

/// Live subscription to a single room's broadcast channel.
///
/// Owns a one-way stream of payloads published to the room, the
/// subscriber's own publishes included. Released on [`unsubscribe`] or
/// drop.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    stream: Option<BoxStream<'static, BrokerEvent>>,
    /// Revokes the broker-side subscription when fired. `None` for
    /// in-process channels, which are released by dropping the stream.
    canceler: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub(crate) fn new(
        stream: BoxStream<'static, BrokerEvent>,
        canceler: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            stream: Some(stream),
            canceler,
        }
    }

    /// Takes the payload stream out of this [`Subscription`]. Subsequent
    /// calls return `None`.
    pub fn take_stream(&mut self) -> Option<BoxStream<'static, BrokerEvent>> {
        self.stream.take()
    }

    /// Revokes the broker-side subscription. Idempotent: repeated calls
    /// (and the implicit call on drop) are no-ops.
    pub fn unsubscribe(&mut self) {
        if let Some(canceler) = self.canceler.take() {
            let _ = canceler.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Room-scoped broadcast messaging shared by all server instances.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Publishes `msg` to everyone subscribed to `room`.
    ///
    /// Broadcast is best-effort: callers log failures and move on instead
    /// of failing the session.
    async fn publish(
        &self,
        room: &RoomId,
        msg: &ServerMsg,
    ) -> Result<(), BrokerError>;

    /// Subscribes to the broadcast channel of `room`.
    ///
    /// Returns only once the subscription is confirmed live by the broker,
    /// so no frame published after this call returns can be missed.
    async fn subscribe(
        &self,
        room: &RoomId,
    ) -> Result<Subscription, BrokerError>;
}

/// Cross-instance set of user IDs currently present in each room.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Adds `user` to the membership set of `room`. Idempotent.
    async fn add_member(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<(), BrokerError>;

    /// Removes `user` from the membership set of `room`. Idempotent.
    async fn remove_member(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<(), BrokerError>;

    /// Returns a snapshot of the membership set of `room`, in no
    /// particular order.
    async fn members(&self, room: &RoomId)
        -> Result<Vec<UserId>, BrokerError>;
}
