#![allow(dead_code)]

//! In-process stand-ins for a Matrix homeserver and a radio status API.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

pub const ACCESS_TOKEN: &str = "syt_fake_token";
pub const PASSWORD: &str = "secret";
pub const ALIAS: &str = "#radio:localhost";
pub const ROOM_ID: &str = "!radio:localhost";

type Reply = (StatusCode, Json<Value>);

fn matrix_error(status: StatusCode, errcode: &str, message: &str) -> Reply {
    (status, Json(json!({ "errcode": errcode, "error": message })))
}

pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake server");
    });
    addr
}

// ── homeserver ────────────────────────────────────────────────────────────────

/// Everything the fake homeserver saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Login { user: String },
    Resolve { alias: String },
    Join { room: String },
    Message { room: String, content: Value },
    Topic { room: String, topic: String },
    Logout,
}

#[derive(Default)]
pub struct Homeserver {
    seen: Mutex<Vec<Seen>>,
    pub reject_messages: Mutex<bool>,
}

impl Homeserver {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Message { content, .. } => content["body"].as_str().map(String::from),
                _ => None,
            })
            .collect()
    }

    pub fn logouts(&self) -> usize {
        self.seen().iter().filter(|s| **s == Seen::Logout).count()
    }

    fn record(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }
}

fn authorized(headers: &HeaderMap) -> Result<(), Reply> {
    let expected = format!("Bearer {}", ACCESS_TOKEN);
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(v) if v == expected => Ok(()),
        Some(_) => Err(matrix_error(
            StatusCode::UNAUTHORIZED,
            "M_UNKNOWN_TOKEN",
            "Invalid access token",
        )),
        None => Err(matrix_error(
            StatusCode::UNAUTHORIZED,
            "M_MISSING_TOKEN",
            "Missing access token",
        )),
    }
}

async fn login(State(hs): State<Arc<Homeserver>>, Json(body): Json<Value>) -> Reply {
    let user = body["identifier"]["user"].as_str().unwrap_or_default().to_string();
    hs.record(Seen::Login { user: user.clone() });

    if body["type"] != "m.login.password" || body["password"] != PASSWORD {
        return matrix_error(StatusCode::FORBIDDEN, "M_FORBIDDEN", "Invalid password");
    }
    (
        StatusCode::OK,
        Json(json!({
            "access_token": ACCESS_TOKEN,
            "user_id": format!("@{}:localhost", user),
            "device_id": "FAKEDEVICE",
        })),
    )
}

async fn resolve(
    State(hs): State<Arc<Homeserver>>,
    headers: HeaderMap,
    Path(alias): Path<String>,
) -> Reply {
    if let Err(reply) = authorized(&headers) {
        return reply;
    }
    hs.record(Seen::Resolve {
        alias: alias.clone(),
    });
    if alias == ALIAS {
        (StatusCode::OK, Json(json!({ "room_id": ROOM_ID, "servers": ["localhost"] })))
    } else {
        matrix_error(StatusCode::NOT_FOUND, "M_NOT_FOUND", "Room alias not found")
    }
}

async fn join(
    State(hs): State<Arc<Homeserver>>,
    headers: HeaderMap,
    Path(room): Path<String>,
) -> Reply {
    if let Err(reply) = authorized(&headers) {
        return reply;
    }
    hs.record(Seen::Join { room: room.clone() });
    if room == ROOM_ID {
        (StatusCode::OK, Json(json!({ "room_id": room })))
    } else {
        matrix_error(StatusCode::FORBIDDEN, "M_FORBIDDEN", "You are not invited to this room.")
    }
}

async fn send(
    State(hs): State<Arc<Homeserver>>,
    headers: HeaderMap,
    Path((room, event_type, _txn)): Path<(String, String, String)>,
    Json(content): Json<Value>,
) -> Reply {
    if let Err(reply) = authorized(&headers) {
        return reply;
    }
    assert_eq!(event_type, "m.room.message");
    hs.record(Seen::Message { room, content });
    if *hs.reject_messages.lock().unwrap() {
        return matrix_error(StatusCode::TOO_MANY_REQUESTS, "M_LIMIT_EXCEEDED", "Too many requests");
    }
    (StatusCode::OK, Json(json!({ "event_id": "$message" })))
}

async fn state(
    State(hs): State<Arc<Homeserver>>,
    headers: HeaderMap,
    Path((room, rest)): Path<(String, String)>,
    Json(content): Json<Value>,
) -> Reply {
    if let Err(reply) = authorized(&headers) {
        return reply;
    }
    assert_eq!(rest.trim_end_matches('/'), "m.room.topic");
    let topic = content["topic"].as_str().unwrap_or_default().to_string();
    hs.record(Seen::Topic { room, topic });
    (StatusCode::OK, Json(json!({ "event_id": "$topic" })))
}

async fn logout(State(hs): State<Arc<Homeserver>>, headers: HeaderMap) -> Reply {
    if let Err(reply) = authorized(&headers) {
        return reply;
    }
    hs.record(Seen::Logout);
    (StatusCode::OK, Json(json!({})))
}

pub async fn spawn_homeserver() -> (String, Arc<Homeserver>) {
    let hs = Arc::new(Homeserver::default());
    let router = Router::new()
        .route("/_matrix/client/v3/login", post(login))
        .route("/_matrix/client/v3/directory/room/:alias", get(resolve))
        .route("/_matrix/client/v3/join/:room", post(join))
        .route(
            "/_matrix/client/v3/rooms/:room/send/:event_type/:txn",
            put(send),
        )
        .route("/_matrix/client/v3/rooms/:room/state/*rest", put(state))
        .route("/_matrix/client/v3/logout", post(logout))
        .with_state(hs.clone());
    let addr = serve(router).await;
    (format!("http://{}", addr), hs)
}

// ── radio API ─────────────────────────────────────────────────────────────────

/// A canned status response.
#[derive(Debug, Clone)]
pub enum Canned {
    Json(Value),
    Status(u16),
    Text(&'static str),
}

/// Serves queued responses in order; the last one repeats forever.
pub struct RadioApi {
    queue: Mutex<VecDeque<Canned>>,
    last: Mutex<Canned>,
    pub hits: Mutex<usize>,
}

impl RadioApi {
    fn next(&self) -> Canned {
        *self.hits.lock().unwrap() += 1;
        let mut queue = self.queue.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(c) = queue.pop_front() {
            *last = c;
        }
        last.clone()
    }
}

async fn status(State(api): State<Arc<RadioApi>>) -> axum::response::Response {
    use axum::response::IntoResponse;
    match api.next() {
        Canned::Json(v) => Json(v).into_response(),
        Canned::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Canned::Text(body) => body.into_response(),
    }
}

pub async fn spawn_radio_api(responses: Vec<Canned>) -> (String, Arc<RadioApi>) {
    let api = Arc::new(RadioApi {
        queue: Mutex::new(responses.into()),
        last: Mutex::new(Canned::Json(json!({}))),
        hits: Mutex::new(0),
    });
    let router = Router::new()
        .route("/status", get(status))
        .with_state(api.clone());
    let addr = serve(router).await;
    (format!("http://{}/status", addr), api)
}
