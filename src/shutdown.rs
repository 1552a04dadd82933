//! Graceful shutdown coordination.
//!
//! Every live session subscribes on start and unsubscribes once its
//! teardown is finished. On a termination signal the server first stops
//! accepting new upgrades, then broadcasts [`ShutdownGracefully`] to all
//! subscribers, waits for them to drain within the configured deadline,
//! and finally stops the HTTP server.

use std::time::Duration;

use actix::{
    Actor, Addr, Context, Handler, Message, MessageResult, Recipient,
};
use actix_web::dev::ServerHandle;
use tokio::time::{self, Instant};

use crate::log::prelude::*;

/// How often the drain loop re-checks the number of live sessions.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Notification a session receives when the server starts draining.
#[derive(Clone, Copy, Debug, Message)]
#[rtype(result = "()")]
pub struct ShutdownGracefully;

/// Subscribes a session to shutdown notifications.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe(pub Recipient<ShutdownGracefully>);

/// Removes a drained session from the subscribers.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe(pub Recipient<ShutdownGracefully>);

/// Broadcasts [`ShutdownGracefully`] to every subscriber.
#[derive(Clone, Copy, Debug, Message)]
#[rtype(result = "()")]
pub struct Drain;

/// Returns the number of sessions still draining.
#[derive(Clone, Copy, Debug, Message)]
#[rtype(result = "usize")]
pub struct LiveCount;

/// Coordinator of graceful session draining.
#[derive(Default)]
pub struct GracefulShutdown {
    subscribers: Vec<Recipient<ShutdownGracefully>>,
}

impl GracefulShutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for GracefulShutdown {
    type Context = Context<Self>;
}

impl Handler<Subscribe> for GracefulShutdown {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _: &mut Context<Self>) {
        self.subscribers.push(msg.0);
    }
}

impl Handler<Unsubscribe> for GracefulShutdown {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Context<Self>) {
        self.subscribers.retain(|sub| *sub != msg.0);
    }
}

impl Handler<Drain> for GracefulShutdown {
    type Result = ();

    fn handle(&mut self, _: Drain, _: &mut Context<Self>) {
        info!("Draining {} live session(s)", self.subscribers.len());
        for sub in &self.subscribers {
            let _ = sub.do_send(ShutdownGracefully);
        }
    }
}

impl Handler<LiveCount> for GracefulShutdown {
    type Result = MessageResult<LiveCount>;

    fn handle(&mut self, _: LiveCount, _: &mut Context<Self>) -> Self::Result {
        MessageResult(self.subscribers.len())
    }
}

/// Waits for a termination signal, then shuts the server down: stops
/// accepting new connections, drains live sessions within `timeout` and
/// stops the HTTP server.
pub async fn listen(
    server: ServerHandle,
    shutdown: Addr<GracefulShutdown>,
    timeout: Duration,
) {
    wait_for_termination().await;
    info!("Termination signal received, shutting down");

    server.pause().await;
    shutdown.do_send(Drain);

    let deadline = Instant::now() + timeout;
    loop {
        match shutdown.send(LiveCount).await {
            Ok(0) | Err(_) => break,
            Ok(live) => {
                if Instant::now() >= deadline {
                    warn!(
                        "Drain deadline reached with {} session(s) live",
                        live,
                    );
                    break;
                }
                time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }
    }

    server.stop(true).await;
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(interrupt) => interrupt,
        Err(e) => {
            error!("Cannot listen for SIGINT: {}", e);
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Cannot listen for SIGTERM: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    /// Subscriber counting received [`ShutdownGracefully`] notifications.
    struct Counting(Arc<AtomicUsize>);

    impl Actor for Counting {
        type Context = Context<Self>;
    }

    impl Handler<ShutdownGracefully> for Counting {
        type Result = ();

        fn handle(&mut self, _: ShutdownGracefully, _: &mut Context<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[actix_rt::test]
    async fn drain_notifies_every_subscriber_once() {
        let shutdown = GracefulShutdown::new().start();
        let received = Arc::new(AtomicUsize::new(0));

        let first = Counting(Arc::clone(&received)).start();
        let second = Counting(Arc::clone(&received)).start();
        shutdown
            .send(Subscribe(first.recipient()))
            .await
            .unwrap();
        shutdown
            .send(Subscribe(second.clone().recipient()))
            .await
            .unwrap();

        shutdown.send(Unsubscribe(second.recipient())).await.unwrap();
        assert_eq!(shutdown.send(LiveCount).await.unwrap(), 1);

        shutdown.send(Drain).await.unwrap();
        for _ in 0..50 {
            if received.load(Ordering::SeqCst) > 0 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
