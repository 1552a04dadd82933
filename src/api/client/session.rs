//! WebSocket session of a single conference participant.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use actix::{
    fut, Actor, ActorContext, ActorFutureExt as _, Addr, AsyncContext,
    Handler, Message, StreamHandler,
};
use actix_web_actors::ws::{self, CloseCode, CloseReason};
use iris_client_api_proto::{
    ClientMsg, MemberInfo, PresenceEvent, RoomId, ServerMsg, SignalFrame,
    SignalKind, UserId,
};

use crate::{
    broker::{Backplane, BrokerEvent, MembershipStore, Subscription},
    log::prelude::*,
    shutdown::{self, GracefulShutdown, ShutdownGracefully},
    signalling::RoomRegistry,
    storage::User,
};

use super::server::Context as AppContext;

/// Directed signaling frame routed from another session on this instance.
///
/// Delivered through the recipient's mailbox, which serializes it with
/// every other write to that socket.
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct DirectMessage(pub ServerMsg);

/// Notification that a newer connection of the same user displaced this
/// one.
#[derive(Clone, Copy, Debug, Message)]
#[rtype(result = "()")]
pub struct Superseded;

/// Resources acquired for a connection before its session starts: the
/// resolved user record, the members snapshot for the `users-list` frame
/// and the live backplane subscription.
pub struct Admission {
    pub user: User,
    pub users_list: Vec<MemberInfo>,
    pub subscription: Subscription,
}

/// Long-lived WebSocket session of one admitted participant.
///
/// The socket's inbound stream is the reader half: it classifies client
/// frames and either publishes them to the backplane (broadcast) or routes
/// them through the registry (directed). The backplane subscription stream
/// is the writer half: it delivers room frames to the socket, suppressing
/// the session's own. Either stream failing drives the whole session into
/// its draining sequence exactly once.
pub struct WsSession {
    room_id: RoomId,
    user_id: UserId,
    /// Display info published in presence notifications.
    user: User,

    ice_servers: Vec<String>,
    users_list: Vec<MemberInfo>,
    subscription: Option<Subscription>,

    idle_timeout: Duration,
    ping_interval: Duration,

    registry: RoomRegistry,
    backplane: Arc<dyn Backplane>,
    membership: Arc<dyn MembershipStore>,
    shutdown: Addr<GracefulShutdown>,

    /// Time of the last frame or pong observed on the socket.
    last_activity: Instant,

    /// Set when a newer connection displaced this one: teardown then
    /// leaves membership and the `user-left` notification to the newer
    /// session.
    superseded: bool,

    /// Set once the draining sequence has started, so it runs only once
    /// whatever combination of exits fires.
    draining: bool,
}

impl WsSession {
    /// Creates a new [`WsSession`] from a successful [`Admission`].
    #[must_use]
    pub fn new(app: &AppContext, room_id: RoomId, admission: Admission) -> Self {
        Self {
            room_id,
            user_id: admission.user.id.clone(),
            user: admission.user,
            ice_servers: app.ice_servers.clone(),
            users_list: admission.users_list,
            subscription: Some(admission.subscription),
            idle_timeout: app.rpc.idle_timeout,
            ping_interval: app.rpc.ping_interval,
            registry: app.registry.clone(),
            backplane: Arc::clone(&app.backplane),
            membership: Arc::clone(&app.membership),
            shutdown: app.shutdown.clone(),
            last_activity: Instant::now(),
            superseded: false,
            draining: false,
        }
    }

    /// Serializes `msg` and writes it to the socket.
    ///
    /// Outbound encoding failures are fatal to the session.
    fn send(&mut self, ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMsg) {
        match serde_json::to_string(msg) {
            Ok(payload) => ctx.text(payload),
            Err(e) => {
                error!("Failed to encode outbound frame: {}", e);
                ctx.close(Some(CloseReason {
                    code: CloseCode::Error,
                    description: Some("internal".to_owned()),
                }));
                self.drain_and_stop(ctx);
            }
        }
    }

    /// Publishes `msg` to the room channel, fire-and-forget.
    fn publish(&self, msg: ServerMsg) {
        let backplane = Arc::clone(&self.backplane);
        let room_id = self.room_id.clone();
        actix::spawn(async move {
            if let Err(e) = backplane.publish(&room_id, &msg).await {
                warn!("Failed to publish to room {}: {}", room_id, e);
            }
        });
    }

    /// Decodes and dispatches one inbound text frame.
    ///
    /// Malformed frames and unknown types are dropped without answering,
    /// not to ping-pong with misbehaving clients.
    fn handle_frame(&mut self, text: &str, _: &mut ws::WebsocketContext<Self>) {
        let msg = match serde_json::from_str::<ClientMsg>(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(
                    "Dropping inbound frame of user {}: {}",
                    self.user_id, e,
                );
                return;
            }
        };

        match msg {
            ClientMsg::ChatMessage(mut chat) => {
                chat.sender = Some(self.user_id.clone());
                self.publish(ServerMsg::ChatMessage(chat));
            }
            ClientMsg::Signal(kind, frame) => self.forward_signal(kind, frame),
        }
    }

    /// Routes a directed frame to its recipient through the local
    /// registry.
    ///
    /// Directed frames never touch the backplane: a recipient without a
    /// live socket on this instance means the frame is dropped.
    fn forward_signal(&self, kind: SignalKind, frame: SignalFrame) {
        let target = match self.registry.lookup(&self.room_id, &frame.to) {
            Some(target) => target,
            None => {
                debug!(
                    "Dropping {} of user {} to absent user {}",
                    kind, self.user_id, frame.to,
                );
                return;
            }
        };
        // The recipient may be gone by the time this arrives; an
        // undeliverable mailbox message is discarded silently.
        target.do_send(DirectMessage(ServerMsg::forwarded_signal(
            kind,
            frame,
            self.user_id.clone(),
        )));
    }

    /// Schedules liveness pings and drops the session when the socket has
    /// been silent for longer than the idle deadline.
    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.ping_interval, |this, ctx| {
            if this.last_activity.elapsed() > this.idle_timeout {
                info!(
                    "Closing idle session of user {} in room {}",
                    this.user_id, this.room_id,
                );
                ctx.close(Some(CloseReason::from(CloseCode::Away)));
                this.drain_and_stop(ctx);
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Builds the presence notification body of this session's user.
    fn presence_event(&self) -> PresenceEvent {
        PresenceEvent {
            user_id: self.user.id.clone(),
            user_name: self.user.user_name.clone(),
            user_photo: self.user.img_url.clone(),
            sender: self.user_id.clone(),
        }
    }

    /// Releases the room-level resources of this session: publishes
    /// `user-left` and removes the membership entry.
    ///
    /// Both steps are attempted regardless of each other's outcome;
    /// failures are logged and swallowed so teardown always completes.
    fn release_remote(
        &self,
    ) -> impl std::future::Future<Output = ()> + 'static {
        let backplane = Arc::clone(&self.backplane);
        let membership = Arc::clone(&self.membership);
        let room_id = self.room_id.clone();
        let user_id = self.user_id.clone();
        let leave = ServerMsg::UserLeft(self.presence_event());
        async move {
            if let Err(e) = backplane.publish(&room_id, &leave).await {
                warn!(
                    "Failed to publish user-left to room {}: {}",
                    room_id, e,
                );
            }
            if let Err(e) = membership.remove_member(&room_id, &user_id).await
            {
                warn!(
                    "Failed to remove member {} of room {}: {}",
                    user_id, room_id, e,
                );
            }
        }
    }

    /// Runs the draining sequence exactly once, then stops the actor.
    fn drain_and_stop(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.draining {
            return;
        }
        self.draining = true;

        self.registry
            .detach(&self.room_id, &self.user_id, &ctx.address());
        if let Some(sub) = self.subscription.as_mut() {
            sub.unsubscribe();
        }

        if self.superseded {
            // The newer connection owns the membership entry and the
            // user-left notification.
            ctx.stop();
            return;
        }

        ctx.wait(
            fut::wrap_future::<_, Self>(self.release_remote())
                .map(|_, _, ctx| ctx.stop()),
        );
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!(
            "Starting session of user {} in room {}",
            self.user_id, self.room_id,
        );

        if let Some(displaced) =
            self.registry
                .attach(&self.room_id, &self.user_id, ctx.address())
        {
            displaced.do_send(Superseded);
        }
        self.shutdown
            .do_send(shutdown::Subscribe(ctx.address().recipient()));

        let ice_servers = self.ice_servers.clone();
        self.send(ctx, &ServerMsg::IceServers { ice_servers });
        let users = std::mem::take(&mut self.users_list);
        self.send(ctx, &ServerMsg::UsersList { users });

        if let Some(stream) = self
            .subscription
            .as_mut()
            .and_then(Subscription::take_stream)
        {
            ctx.add_stream(stream);
        }

        self.publish(ServerMsg::UserJoined(self.presence_event()));

        self.heartbeat(ctx);
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.shutdown
            .do_send(shutdown::Unsubscribe(ctx.address().recipient()));

        if !self.draining {
            // Stopped without the draining sequence (e.g. the context was
            // dropped): release everything out-of-band.
            self.draining = true;
            self.registry
                .detach(&self.room_id, &self.user_id, &ctx.address());
            if let Some(sub) = self.subscription.as_mut() {
                sub.unsubscribe();
            }
            if !self.superseded {
                actix::spawn(self.release_remote());
            }
        }

        debug!(
            "Closed session of user {} in room {}",
            self.user_id, self.room_id,
        );
    }
}

/// Reader half: inbound socket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(
        &mut self,
        msg: Result<ws::Message, ws::ProtocolError>,
        ctx: &mut Self::Context,
    ) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(
                    "Protocol error on session of user {}: {}",
                    self.user_id, e,
                );
                self.drain_and_stop(ctx);
                return;
            }
        };

        self.last_activity = Instant::now();
        match msg {
            ws::Message::Text(text) => self.handle_frame(&text, ctx),
            ws::Message::Ping(ping) => ctx.pong(&ping),
            ws::Message::Pong(_) => {}
            // Binary frames are not part of the protocol.
            ws::Message::Binary(_) => {}
            ws::Message::Close(reason) => {
                ctx.close(reason);
                self.drain_and_stop(ctx);
            }
            ws::Message::Continuation(_) | ws::Message::Nop => {}
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        self.drain_and_stop(ctx);
    }
}

/// Writer half: frames fanned out by the backplane.
impl StreamHandler<BrokerEvent> for WsSession {
    fn handle(&mut self, event: BrokerEvent, ctx: &mut Self::Context) {
        let BrokerEvent(payload) = event;
        match serde_json::from_str::<ServerMsg>(&payload) {
            Ok(msg) => {
                if msg.sender() == Some(&self.user_id) {
                    // Self-send suppression: the subscription observes the
                    // session's own publishes too.
                    return;
                }
                ctx.text(payload);
            }
            Err(e) => {
                debug!(
                    "Dropping undecodable frame of room {}: {}",
                    self.room_id, e,
                );
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        if !self.draining {
            warn!(
                "Subscription stream of room {} ended, closing session of \
                 user {}",
                self.room_id, self.user_id,
            );
        }
        self.drain_and_stop(ctx);
    }
}

impl Handler<DirectMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: DirectMessage, ctx: &mut Self::Context) {
        self.send(ctx, &msg.0);
    }
}

impl Handler<Superseded> for WsSession {
    type Result = ();

    fn handle(&mut self, _: Superseded, ctx: &mut Self::Context) {
        info!(
            "Session of user {} in room {} superseded by a newer connection",
            self.user_id, self.room_id,
        );
        self.superseded = true;
        self.send(ctx, &ServerMsg::error("superseded"));
        ctx.close(Some(CloseReason {
            code: CloseCode::Policy,
            description: Some("superseded".to_owned()),
        }));
        self.drain_and_stop(ctx);
    }
}

impl Handler<ShutdownGracefully> for WsSession {
    type Result = ();

    fn handle(&mut self, _: ShutdownGracefully, ctx: &mut Self::Context) {
        debug!(
            "Session of user {} in room {} received shutdown notification",
            self.user_id, self.room_id,
        );
        ctx.close(Some(CloseReason::from(CloseCode::Away)));
        self.drain_and_stop(ctx);
    }
}

/// Short-lived WebSocket session delivering a single `error` frame before
/// closing: the rejected path of admission.
pub struct Rejection {
    reason: String,
}

impl Rejection {
    #[must_use]
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Actor for Rejection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Rejecting connection: {}", self.reason);
        if let Ok(payload) =
            serde_json::to_string(&ServerMsg::error(self.reason.clone()))
        {
            ctx.text(payload);
        }
        ctx.close(Some(CloseReason {
            code: CloseCode::Policy,
            description: Some(self.reason.clone()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for Rejection {
    fn handle(
        &mut self,
        _: Result<ws::Message, ws::ProtocolError>,
        _: &mut Self::Context,
    ) {
    }
}
