//! HTTP surface of the signaling server.

use std::{collections::HashMap, io, sync::Arc};

use actix::Addr;
use actix_cors::Cors;
use actix_web::{
    dev::Server,
    http::{header, StatusCode},
    middleware,
    web::{self, Data, Json, Path, Payload},
    App, HttpRequest, HttpResponse, HttpServer,
};
use actix_web_actors::ws;
use derive_more::{Display, From};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use iris_client_api_proto::{RoomId, UserId};

use crate::{
    auth::{AuthError, AuthService},
    broker::{Backplane, BrokerError, MembershipStore},
    conf::{self, Conf},
    log::prelude::*,
    shutdown::GracefulShutdown,
    signalling::{
        policy::{self, JoinError},
        RoomRegistry,
    },
    storage::{Room, RoomRepository, StorageError, User, UserRepository},
};

use super::session::{Admission, Rejection, WsSession};

/// Shared state of the HTTP server.
pub struct Context {
    /// ICE servers advertised verbatim to every new session.
    pub ice_servers: Vec<String>,

    /// Participant cap applied to rooms created by the server.
    pub default_max_participants: usize,

    /// Whether an unknown room ID on the socket path materializes a
    /// placeholder room owned by the connecting user.
    pub auto_create_rooms: bool,

    /// Client session settings.
    pub rpc: conf::Rpc,

    pub auth: AuthService,
    pub rooms: Arc<dyn RoomRepository>,
    pub users: Arc<dyn UserRepository>,
    pub registry: RoomRegistry,
    pub backplane: Arc<dyn Backplane>,
    pub membership: Arc<dyn MembershipStore>,
    pub shutdown: Addr<GracefulShutdown>,
}

/// Reason an authenticated connection was not admitted into a room.
#[derive(Debug, Display, From)]
enum AdmitError {
    /// Room policy refused the connection.
    #[display(fmt = "{}", _0)]
    Policy(JoinError),

    /// The store failed while admitting.
    #[display(fmt = "cannot join room")]
    Storage(StorageError),

    /// The backplane failed while admitting.
    #[display(fmt = "cannot join room")]
    Broker(BrokerError),
}

/// Builds the `{success: true, data}` response envelope.
fn success<T: serde::Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "data": data }))
}

/// Builds the `{success: false, error}` response envelope.
fn failure(status: StatusCode, error: &str) -> HttpResponse {
    HttpResponse::build(status)
        .json(json!({ "success": false, "error": error }))
}

fn auth_failure(e: &AuthError) -> HttpResponse {
    match e {
        AuthError::Unauthorized => {
            failure(StatusCode::UNAUTHORIZED, "invalid credentials")
        }
        AuthError::EmailTaken => {
            failure(StatusCode::CONFLICT, "registration failed")
        }
        AuthError::Storage(_) | AuthError::Internal => {
            failure(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Extracts the bearer credentials of a request: the `Authorization`
/// header first, then the `access_token` cookie, then the `access_token`
/// query parameter.
fn credentials(req: &HttpRequest) -> Option<String> {
    if let Some(header) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let token = header.strip_prefix("Bearer ").unwrap_or(header);
        return Some(token.to_owned());
    }
    if let Some(cookie) = req.cookie("access_token") {
        return Some(cookie.value().to_owned());
    }
    web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .ok()
        .and_then(|query| query.get("access_token").cloned())
}

/// Resolves the authenticated identity of a request.
fn authenticate(state: &Context, req: &HttpRequest) -> Result<UserId, AuthError> {
    let token = credentials(req).ok_or(AuthError::Unauthorized)?;
    state.auth.verify(&token)
}

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn register(
    state: Data<Context>,
    body: Json<Credentials>,
) -> HttpResponse {
    match state.auth.register(&body.email, &body.password).await {
        Ok((user, tokens)) => success(json!({
            "id": user.id,
            "access_token": tokens.access_token,
            "refresh_token": tokens.refresh_token,
        })),
        Err(e) => auth_failure(&e),
    }
}

async fn login(state: Data<Context>, body: Json<Credentials>) -> HttpResponse {
    match state.auth.login(&body.email, &body.password).await {
        Ok((user, tokens)) => success(json!({
            "id": user.id,
            "access_token": tokens.access_token,
            "refresh_token": tokens.refresh_token,
        })),
        Err(e) => auth_failure(&e),
    }
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    state: Data<Context>,
    body: Json<RefreshRequest>,
) -> HttpResponse {
    match state.auth.refresh(&body.refresh_token).await {
        Ok(access_token) => {
            success(json!({ "access_token": access_token }))
        }
        Err(e) => auth_failure(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    title: String,
    #[serde(default)]
    description: String,
}

async fn create_room(
    state: Data<Context>,
    req: HttpRequest,
    body: Json<CreateRoomRequest>,
) -> HttpResponse {
    let owner = match authenticate(state.get_ref(), &req) {
        Ok(owner) => owner,
        Err(e) => return auth_failure(&e),
    };

    let body = body.into_inner();
    let room = Room::new(
        RoomId(Uuid::new_v4().to_string()),
        owner.clone(),
        body.title,
        body.description,
        state.default_max_participants,
    );
    if let Err(e) = state.rooms.create(room.clone()).await {
        error!("Failed to create room: {}", e);
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "create failed");
    }
    if let Err(e) = state.membership.add_member(&room.id, &owner).await {
        error!("Failed to join owner into room {}: {}", room.id, e);
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "join failed");
    }

    success(json!({ "id": room.id }))
}

async fn join_room(
    state: Data<Context>,
    req: HttpRequest,
    path: Path<String>,
) -> HttpResponse {
    let user = match authenticate(state.get_ref(), &req) {
        Ok(user) => user,
        Err(e) => return auth_failure(&e),
    };
    let room_id = RoomId(path.into_inner());

    let room = match state.rooms.get(&room_id).await {
        Ok(room) => room,
        Err(e) => {
            error!("Failed to load room {}: {}", room_id, e);
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "cannot join room",
            );
        }
    };
    let occupancy = match state.membership.members(&room_id).await {
        Ok(members) => members.len(),
        Err(e) => {
            error!("Failed to list members of room {}: {}", room_id, e);
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "cannot join room",
            );
        }
    };
    if let Err(reason) = policy::can_join(room.as_ref(), occupancy) {
        let status = match reason {
            JoinError::RoomNotFound | JoinError::RoomClosed => {
                StatusCode::NOT_FOUND
            }
            JoinError::RoomFull => StatusCode::CONFLICT,
        };
        return failure(status, &reason.to_string());
    }
    if let Err(e) = state.membership.add_member(&room_id, &user).await {
        error!("Failed to join user {} into room {}: {}", user, room_id, e);
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "join failed");
    }

    success(json!({ "id": room_id }))
}

async fn user_info(state: Data<Context>, path: Path<String>) -> HttpResponse {
    let user_id = UserId(path.into_inner());
    match state.users.get(&user_id).await {
        Ok(Some(user)) => success(json!({
            "id": user.id,
            "userName": user.user_name,
            "imgUrl": user.img_url,
        })),
        Ok(None) => failure(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => {
            error!("Failed to load user {}: {}", user_id, e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Admits an authenticated connection into a room: resolves the room
/// (materializing a placeholder when allowed), applies the room policy,
/// snapshots the members already present, records the membership and opens
/// the backplane subscription.
///
/// Failures after the membership insert roll it back best-effort.
async fn admit(
    state: &Context,
    room_id: &RoomId,
    user_id: &UserId,
) -> Result<Admission, AdmitError> {
    let mut room = state.rooms.get(room_id).await?;
    if room.is_none() && state.auto_create_rooms {
        // Ad-hoc room shared via URL before anyone created it explicitly.
        let placeholder = Room::new(
            room_id.clone(),
            user_id.clone(),
            String::new(),
            String::new(),
            state.default_max_participants,
        );
        state.rooms.create(placeholder.clone()).await?;
        room = Some(placeholder);
    }

    let members = state.membership.members(room_id).await?;
    policy::can_join(room.as_ref(), members.len())?;

    // Resolve display info of everyone already present. Best-effort: a
    // member whose record cannot be loaded is left out of the snapshot.
    let mut users_list = Vec::with_capacity(members.len());
    for id in &members {
        if id == user_id {
            continue;
        }
        match state.users.get(id).await {
            Ok(Some(user)) => users_list.push(user.member_info()),
            Ok(None) => {}
            Err(e) => warn!("Failed to resolve member {}: {}", id, e),
        }
    }

    let user = match state.users.get(user_id).await? {
        Some(user) => user,
        None => {
            // Authenticated but unknown to the store: materialize a stub
            // record so the join payload stays well-formed.
            let user = User::placeholder(user_id.clone());
            if let Err(e) = state.users.create(user.clone()).await {
                warn!("Failed to persist placeholder user {}: {}", user.id, e);
            }
            user
        }
    };

    state.membership.add_member(room_id, user_id).await?;
    let subscription = match state.backplane.subscribe(room_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Failed to subscribe to room {}: {}", room_id, e);
            let _ = state.membership.remove_member(room_id, user_id).await;
            return Err(e.into());
        }
    };

    Ok(Admission {
        user,
        users_list,
        subscription,
    })
}

async fn serve_ws(
    req: HttpRequest,
    room_id: RoomId,
    claimed: Option<UserId>,
    state: Data<Context>,
    payload: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    if !is_websocket_upgrade(&req) {
        return Ok(HttpResponse::UpgradeRequired().finish());
    }
    let user_id = match authenticate(state.get_ref(), &req) {
        Ok(user_id) => user_id,
        Err(_) => return Ok(HttpResponse::Unauthorized().finish()),
    };
    // A user ID in the URL must name the authenticated identity.
    if let Some(claimed) = claimed {
        if claimed != user_id {
            return ws::start(
                Rejection::new("user id mismatch"),
                &req,
                payload,
            );
        }
    }

    match admit(state.get_ref(), &room_id, &user_id).await {
        Ok(admission) => ws::start(
            WsSession::new(state.get_ref(), room_id, admission),
            &req,
            payload,
        ),
        Err(reject) => {
            info!("Refused user {} in room {}: {}", user_id, room_id, reject);
            ws::start(Rejection::new(reject.to_string()), &req, payload)
        }
    }
}

async fn ws_connect(
    req: HttpRequest,
    path: Path<String>,
    state: Data<Context>,
    payload: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    serve_ws(req, RoomId(path.into_inner()), None, state, payload).await
}

async fn ws_connect_as(
    req: HttpRequest,
    path: Path<(String, String)>,
    state: Data<Context>,
    payload: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let (room_id, user_id) = path.into_inner();
    serve_ws(
        req,
        RoomId(room_id),
        Some(UserId(user_id)),
        state,
        payload,
    )
    .await
}

/// Registers all routes of the public API.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/video-conference")
            .service(
                web::resource("/auth/register")
                    .route(web::post().to(register)),
            )
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(
                web::resource("/auth/refresh").route(web::post().to(refresh)),
            )
            .service(web::resource("/room/").route(web::post().to(create_room)))
            .service(
                web::resource("/room/join/{id}")
                    .route(web::post().to(join_room)),
            )
            .service(
                web::resource("/user/userInfo/{id}")
                    .route(web::get().to(user_info)),
            )
            .service(web::resource("/health").route(web::get().to(health)))
            .service(
                web::resource("/ws/{room_id}").route(web::get().to(ws_connect)),
            )
            .service(
                web::resource("/ws/{room_id}/{user_id}")
                    .route(web::get().to(ws_connect_as)),
            ),
    );
}

/// Starts the HTTP server.
///
/// The returned [`Server`] must be awaited to completion; OS signals are
/// handled by [`crate::shutdown`], not by the server itself.
///
/// # Errors
///
/// Errors if the listening socket cannot be bound.
pub fn run(conf: &Conf, ctx: Context) -> io::Result<Server> {
    let ctx = Data::new(ctx);
    let origins = conf.server.origins();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                header::ORIGIN,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::AUTHORIZATION,
            ])
            .supports_credentials();
        for origin in &origins {
            cors = cors.allowed_origin(origin);
        }
        App::new()
            .app_data(ctx.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(configure)
    })
    .disable_signals()
    .bind(conf.server.bind_addr())?
    .run();

    Ok(server)
}
