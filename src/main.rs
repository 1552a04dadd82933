//! Iris signaling server binary.

use std::{io, sync::Arc};

use actix::Actor as _;

use iris::{
    api::client::server::{self, Context},
    auth::AuthService,
    broker::redis::RedisBroker,
    conf::Conf,
    log::{self, prelude::*},
    shutdown::{self, GracefulShutdown},
    signalling::RoomRegistry,
    storage::memory::{InMemoryRooms, InMemorySessions, InMemoryUsers},
};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();

    let conf = Conf::parse().map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let _log_guard = log::init();
    info!(
        "Iris signaling server v{} is starting",
        env!("CARGO_PKG_VERSION"),
    );

    let broker =
        Arc::new(RedisBroker::connect(&conf.redis).await.map_err(|e| {
            io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string())
        })?);
    info!("Connected to Redis at {}", conf.redis.url);

    let rooms = Arc::new(InMemoryRooms::new());
    let users = Arc::new(InMemoryUsers::new());
    let sessions = Arc::new(InMemorySessions::new());
    let auth = AuthService::new(&conf.auth, users.clone(), sessions);

    let shutdown_addr = GracefulShutdown::new().start();

    let ctx = Context {
        ice_servers: conf.ice.urls(),
        default_max_participants: conf.room.max_participants,
        auto_create_rooms: conf.server.auto_create_rooms,
        rpc: conf.rpc,
        auth,
        rooms,
        users,
        registry: RoomRegistry::new(),
        backplane: broker.clone(),
        membership: broker,
        shutdown: shutdown_addr.clone(),
    };

    let server = server::run(&conf, ctx)?;
    info!("Listening on {}", conf.server.bind_addr());

    let handle = server.handle();
    actix_web::rt::spawn(shutdown::listen(
        handle,
        shutdown_addr,
        conf.shutdown.timeout,
    ));

    server.await?;
    info!("Iris signaling server stopped");
    Ok(())
}
