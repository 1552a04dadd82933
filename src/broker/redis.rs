//! Redis-backed backplane and membership store.
//!
//! Broadcast frames travel through the `room:{roomID}` Pub/Sub channel,
//! membership lives in the `room:{roomID}:participants` set. Commands go
//! through a connection pool; every subscription opens its own dedicated
//! connection, as Redis requires.

use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed::PoolConfig as PoolLimits;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures::StreamExt as _;
use iris_client_api_proto::{RoomId, ServerMsg, UserId};
use tokio::{
    sync::{mpsc, oneshot},
    time,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{conf, log::prelude::*};

use super::{
    Backplane, BrokerError, BrokerEvent, MembershipStore, Subscription,
};

/// Name of the Pub/Sub channel carrying a room's broadcast frames.
fn room_channel(room: &RoomId) -> String {
    format!("room:{}", room)
}

/// Key of a room's membership set.
fn members_key(room: &RoomId) -> String {
    format!("room:{}:participants", room)
}

/// Redis-backed [`Backplane`] and [`MembershipStore`].
pub struct RedisBroker {
    /// Client used to open dedicated Pub/Sub connections.
    client: ::redis::Client,

    /// Pool of command connections.
    pool: Pool,

    /// Deadline for the subscribe acknowledgement round-trip.
    subscribe_timeout: Duration,
}

impl RedisBroker {
    /// Connects to the Redis server described by the provided
    /// configuration and verifies the connection with a `PING`.
    ///
    /// # Errors
    ///
    /// Errors if the URL is malformed, the pool cannot be built, or the
    /// server does not answer the `PING` within the connect timeout.
    pub async fn connect(conf: &conf::Redis) -> Result<Self, BrokerError> {
        let client = ::redis::Client::open(conf.url.as_str())?;
        let mut pool_cfg = PoolConfig::from_url(&conf.url);
        pool_cfg.pool = Some(PoolLimits::new(conf.pool_size));
        let pool = pool_cfg.create_pool(Some(Runtime::Tokio1))?;

        let ping = async {
            let mut conn = pool.get().await?;
            ::redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await?;
            Ok::<_, BrokerError>(())
        };
        time::timeout(conf.connect_timeout, ping)
            .await
            .map_err(|_| BrokerError::Timeout)??;

        Ok(Self {
            client,
            pool,
            subscribe_timeout: conf.subscribe_timeout,
        })
    }
}

#[async_trait]
impl Backplane for RedisBroker {
    async fn publish(
        &self,
        room: &RoomId,
        msg: &ServerMsg,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(msg)?;
        let mut conn = self.pool.get().await?;
        ::redis::cmd("PUBLISH")
            .arg(room_channel(room))
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        room: &RoomId,
    ) -> Result<Subscription, BrokerError> {
        let channel = room_channel(room);

        // SUBSCRIBE completes only after the server acknowledges it, so
        // once this returns no subsequent publish can race past us.
        let subscribe = async {
            let conn = self.client.get_async_connection().await?;
            let mut pubsub = conn.into_pubsub();
            pubsub.subscribe(&channel).await?;
            Ok::<_, ::redis::RedisError>(pubsub)
        };
        let mut pubsub = time::timeout(self.subscribe_timeout, subscribe)
            .await
            .map_err(|_| BrokerError::Timeout)??;

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    msg = messages.next() => match msg {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!("Dropping malformed frame: {}", e);
                                    continue;
                                }
                            };
                            if tx.send(BrokerEvent(payload)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            // Dropping the connection revokes the server-side subscription.
        });

        Ok(Subscription::new(
            Box::pin(UnboundedReceiverStream::new(rx)),
            Some(cancel_tx),
        ))
    }
}

#[async_trait]
impl MembershipStore for RedisBroker {
    async fn add_member(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<(), BrokerError> {
        let mut conn = self.pool.get().await?;
        ::redis::cmd("SADD")
            .arg(members_key(room))
            .arg(&user.0)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_member(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<(), BrokerError> {
        let mut conn = self.pool.get().await?;
        ::redis::cmd("SREM")
            .arg(members_key(room))
            .arg(&user.0)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn members(
        &self,
        room: &RoomId,
    ) -> Result<Vec<UserId>, BrokerError> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(members_key(room))
            .query_async(&mut conn)
            .await?;
        Ok(members.into_iter().map(UserId).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_names_follow_the_wire_contract() {
        let room = RoomId::from("r1");

        assert_eq!(room_channel(&room), "room:r1");
        assert_eq!(members_key(&room), "room:r1:participants");
    }
}
