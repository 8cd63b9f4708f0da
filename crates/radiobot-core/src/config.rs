use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

/// Prefix for environment overrides, e.g. `RADIOBOT__MATRIX__ROOM_ID`.
pub const ENV_PREFIX: &str = "RADIOBOT__";
const ENV_DELIMITER: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// The merged file layers do not fit the config schema.
    #[error("invalid config: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: &'static str },

    #[error("missing required config: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub radio: RadioConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    #[serde(default = "default_homeserver")]
    pub homeserver: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Internal room id (`!abc:server`) or alias (`#name:server`).
    #[serde(default)]
    pub room_id: String,
    #[serde(default = "default_send_messages")]
    pub send_messages: bool,
    #[serde(default)]
    pub update_topic: bool,
}

// Keeps the password out of log output.
impl std::fmt::Debug for MatrixConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixConfig")
            .field("homeserver", &self.homeserver)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("room_id", &self.room_id)
            .field("send_messages", &self.send_messages)
            .field("update_topic", &self.update_topic)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Station name shown in the room topic.
    #[serde(default)]
    pub name: String,
    /// Public stream URL linked from the room topic.
    #[serde(default)]
    pub stream_url: String,
    /// Now-playing status endpoint that gets polled.
    #[serde(default)]
    pub api_url: String,
    /// Seconds between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            homeserver: default_homeserver(),
            user: String::new(),
            password: String::new(),
            room_id: String::new(),
            send_messages: default_send_messages(),
            update_topic: false,
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            stream_url: String::new(),
            api_url: String::new(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl RadioConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

fn default_homeserver() -> String {
    "https://matrix.org".to_string()
}

fn default_send_messages() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    15
}

impl Config {
    /// Layers, lowest priority first: defaults, the YAML file, the TOML
    /// file, then `RADIOBOT__*` variables from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let toml_path = Self::toml_path();
        let yaml_path = Self::yaml_path();
        let mut config = Self::from_files(toml_path.as_deref(), yaml_path.as_deref())?;
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Merges the given files key by key, TOML over YAML, with serde
    /// defaults filling whatever neither sets.
    pub fn from_files(
        toml_path: Option<&Path>,
        yaml_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut merged = serde_json::Value::Object(Default::default());

        if let Some(path) = yaml_path {
            let layer: serde_json::Value =
                serde_yaml::from_str(&read_file(path)?).map_err(|source| ConfigError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })?;
            merge(&mut merged, layer);
        }

        if let Some(path) = toml_path {
            let layer: serde_json::Value =
                toml::from_str(&read_file(path)?).map_err(|source| ConfigError::Toml {
                    path: path.to_path_buf(),
                    source,
                })?;
            merge(&mut merged, layer);
        }

        serde_json::from_value(merged).map_err(ConfigError::Schema)
    }

    /// `$TOML_FILE_PATH`, then `./config.toml`, then the per-user config dir.
    /// Returns `None` when no candidate exists; running on env vars alone is fine.
    pub fn toml_path() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("TOML_FILE_PATH") {
            let path = PathBuf::from(p);
            return path.exists().then_some(path);
        }

        [
            PathBuf::from("config.toml"),
            platform::config_dir().join("config.toml"),
        ]
        .into_iter()
        .find(|p| p.exists())
    }

    /// `$YAML_FILE_PATH`, then `./config.yaml`.
    pub fn yaml_path() -> Option<PathBuf> {
        let path = std::env::var("YAML_FILE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.yaml"));
        path.exists().then_some(path)
    }

    /// Applies overrides from `(name, value)` pairs. Names are matched
    /// case-insensitively; anything without the prefix or naming an unknown
    /// field is ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let upper = key.to_ascii_uppercase();
            let Some(rest) = upper.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, field)) = rest.split_once(ENV_DELIMITER) else {
                continue;
            };

            match (section, field) {
                ("MATRIX", "HOMESERVER") => self.matrix.homeserver = value,
                ("MATRIX", "USER") => self.matrix.user = value,
                ("MATRIX", "PASSWORD") => self.matrix.password = value,
                ("MATRIX", "ROOM_ID") => self.matrix.room_id = value,
                ("MATRIX", "SEND_MESSAGES") => self.matrix.send_messages = parse_bool(&key, &value)?,
                ("MATRIX", "UPDATE_TOPIC") => self.matrix.update_topic = parse_bool(&key, &value)?,
                ("RADIO", "NAME") => self.radio.name = value,
                ("RADIO", "STREAM_URL") => self.radio.stream_url = value,
                ("RADIO", "API_URL") => self.radio.api_url = value,
                ("RADIO", "POLL_INTERVAL") => {
                    self.radio.poll_interval = value.trim().parse().map_err(|_| {
                        ConfigError::InvalidEnv {
                            key: key.clone(),
                            value: value.clone(),
                        }
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks that everything the bridge cannot run without is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("matrix.user", &self.matrix.user),
            ("matrix.password", &self.matrix.password),
            ("matrix.room_id", &self.matrix.room_id),
            ("radio.api_url", &self.radio.api_url),
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        if self.radio.poll_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "radio.poll_interval",
                reason: "must be at least 1 second",
            });
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively overlays `layer` onto `base`; tables merge, everything else replaces.
fn merge(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
