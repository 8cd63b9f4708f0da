//! Minimal Matrix client-server API client.
//!
//! Covers only the calls the bridge needs: password login, alias
//! resolution, join, `m.room.message`, `m.room.topic` and logout.

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::session::Messenger;

const CLIENT_API_PREFIX: [&str; 3] = ["_matrix", "client", "v3"];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEVICE_DISPLAY_NAME: &str = "radiobot";

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("invalid homeserver URL {url:?}: {reason}")]
    InvalidHomeserver { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The homeserver answered with a standard Matrix error body.
    #[error("{errcode} ({status}): {message}")]
    Api {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("not logged in")]
    NotLoggedIn,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomIdResponse {
    room_id: String,
}

#[derive(Debug, Deserialize)]
struct EventIdResponse {
    event_id: String,
}

pub struct MatrixClient {
    http: reqwest::Client,
    homeserver: Url,
    access_token: Option<String>,
    user_id: Option<String>,
    device_id: Option<String>,
}

impl std::fmt::Debug for MatrixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixClient")
            .field("homeserver", &self.homeserver.as_str())
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("logged_in", &self.access_token.is_some())
            .finish()
    }
}

impl MatrixClient {
    pub fn new(homeserver: &str) -> Result<Self, MatrixError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("radiobot/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Self::with_client(http, homeserver)
    }

    pub fn with_client(http: reqwest::Client, homeserver: &str) -> Result<Self, MatrixError> {
        let invalid = |reason: String| MatrixError::InvalidHomeserver {
            url: homeserver.to_string(),
            reason,
        };
        let url = Url::parse(homeserver).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }
        Ok(Self {
            http,
            homeserver: url,
            access_token: None,
            user_id: None,
            device_id: None,
        })
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.access_token.is_some()
    }

    /// Builds `<homeserver>/_matrix/client/v3/<segments...>`, percent-encoding
    /// each segment so ids like `#room:server` survive intact.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.homeserver.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(CLIENT_API_PREFIX);
            path.extend(segments);
        }
        url
    }

    async fn request<T>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
        authenticated: bool,
    ) -> Result<T, MatrixError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoint(segments);
        debug!("matrix: {} {}", method, url.path());

        let mut req = self.http.request(method, url);
        if authenticated {
            let token = self.access_token.as_deref().ok_or(MatrixError::NotLoggedIn)?;
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response.bytes().await.ok().as_deref()));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| MatrixError::MalformedResponse(e.to_string()))
    }
}

fn api_error(status: StatusCode, body: Option<&[u8]>) -> MatrixError {
    let parsed = body.and_then(|b| serde_json::from_slice::<ErrorBody>(b).ok());
    let (errcode, message) = match parsed {
        Some(ErrorBody { errcode, error }) => (errcode, error),
        None => (None, None),
    };
    MatrixError::Api {
        status: status.as_u16(),
        errcode: errcode.unwrap_or_else(|| "M_UNKNOWN".to_string()),
        message: message
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string()),
    }
}

/// Unique per process: millisecond timestamp plus a counter.
fn next_txn_id() -> String {
    let seq = NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed);
    format!("radiobot.{}.{}", chrono::Utc::now().timestamp_millis(), seq)
}

#[async_trait]
impl Messenger for MatrixClient {
    async fn login(&mut self, user: &str, password: &str) -> Result<String, MatrixError> {
        let body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": user },
            "password": password,
            "initial_device_display_name": DEVICE_DISPLAY_NAME,
        });
        let res: LoginResponse = self.request(Method::POST, &["login"], Some(body), false).await?;

        self.access_token = Some(res.access_token);
        self.device_id = res.device_id;
        self.user_id = Some(res.user_id.clone());
        Ok(res.user_id)
    }

    async fn resolve_alias(&mut self, alias: &str) -> Result<String, MatrixError> {
        let res: RoomIdResponse = self
            .request(Method::GET, &["directory", "room", alias], None, true)
            .await?;
        Ok(res.room_id)
    }

    async fn join(&mut self, room: &str) -> Result<String, MatrixError> {
        let res: RoomIdResponse = self
            .request(Method::POST, &["join", room], Some(json!({})), true)
            .await?;
        Ok(res.room_id)
    }

    async fn send_message(
        &mut self,
        room_id: &str,
        body: &str,
        formatted_body: &str,
    ) -> Result<String, MatrixError> {
        let content = json!({
            "msgtype": "m.text",
            "format": "org.matrix.custom.html",
            "body": body,
            "formatted_body": formatted_body,
        });
        let txn_id = next_txn_id();
        let res: EventIdResponse = self
            .request(
                Method::PUT,
                &["rooms", room_id, "send", "m.room.message", txn_id.as_str()],
                Some(content),
                true,
            )
            .await?;
        Ok(res.event_id)
    }

    async fn set_topic(&mut self, room_id: &str, topic: &str) -> Result<String, MatrixError> {
        // Empty state key, hence the trailing empty segment.
        let res: EventIdResponse = self
            .request(
                Method::PUT,
                &["rooms", room_id, "state", "m.room.topic", ""],
                Some(json!({ "topic": topic })),
                true,
            )
            .await?;
        Ok(res.event_id)
    }

    async fn logout(&mut self) -> Result<(), MatrixError> {
        let result: Result<Value, MatrixError> = self
            .request(Method::POST, &["logout"], Some(json!({})), true)
            .await;
        // The token is gone either way; retrying with it would be pointless.
        self.access_token = None;
        result.map(|_| ())
    }
}
