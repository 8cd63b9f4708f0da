//! Now-playing status: fetching the radio API and normalizing whatever it
//! returns into a [`StatusRecord`].
//!
//! The API answers either with a JSON object or with a list of
//! `[key, value]` pairs (liquidsoap's `request.metadata` dump). Both shapes
//! fold into the same record; anything else yields an empty record.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Shown when the feed carries neither a title nor a filename.
pub const UNKNOWN_SONG: &str = "Unknown Song";

/// Timeout for a single status request.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One poll result. Every field is optional since the feed guarantees none of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRecord {
    pub title: Option<String>,
    pub filename: Option<String>,
    pub encoder: Option<String>,
    pub language: Option<String>,
    pub vendor: Option<String>,
    pub initial_uri: Option<String>,
    pub rid: Option<String>,
    pub status: Option<String>,
    pub temporary: Option<String>,
}

impl StatusRecord {
    /// Builds a record from an arbitrary JSON value. Never fails.
    pub fn normalize(payload: &Value) -> Self {
        match payload {
            Value::Object(map) => Self::from_map(map),
            Value::Array(items) => Self::from_map(&fold_pairs(items)),
            _ => Self::default(),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        let field = |name: &str| map.get(name).and_then(scalar_string);
        Self {
            title: field("title"),
            filename: field("filename"),
            encoder: field("encoder"),
            language: field("language"),
            vendor: field("vendor"),
            initial_uri: field("initial_uri"),
            rid: field("rid"),
            status: field("status"),
            temporary: field("temporary"),
        }
    }

    /// The string shown to users: `title`, else the last path segment of
    /// `filename` with underscores as spaces, else [`UNKNOWN_SONG`].
    /// Never empty.
    pub fn display_title(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }

        let from_file = self
            .filename
            .as_deref()
            .and_then(|f| f.rsplit('/').next())
            .map(|segment| segment.replace('_', " "))
            .filter(|s| !s.is_empty());

        from_file.unwrap_or_else(|| UNKNOWN_SONG.to_string())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `[["title", "x"], ["rid", "3"]]` → `{"title": "x", "rid": "3"}`.
/// Entries that are not two-element arrays with a string key are dropped;
/// a repeated key keeps its last value.
fn fold_pairs(items: &[Value]) -> Map<String, Value> {
    let mut map = Map::new();
    for item in items {
        if let Some([Value::String(key), value]) = item.as_array().map(Vec::as_slice) {
            map.insert(key.clone(), value.clone());
        }
    }
    map
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Fetching ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connect/timeout failures and non-2xx statuses.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("invalid JSON body: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Where raw status payloads come from.
#[async_trait]
pub trait StatusSource: Send {
    async fn fetch(&mut self) -> Result<Value, FetchError>;
}

/// Polls a JSON endpoint over HTTP.
pub struct HttpStatusSource {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusSource {
    pub fn new(url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("radiobot/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(FetchError::Request)?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&mut self) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(FetchError::Request)?;

        response.json::<Value>().await.map_err(FetchError::Decode)
    }
}
