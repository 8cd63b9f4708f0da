//! Session lifecycle against the messaging service.
//!
//! Transitions:
//!   Disconnected -> Authenticating -> (Resolving ->) Joining -> Active
//!   Authenticating | Resolving | Joining --failure--> Closing -> Closed
//!   Active -> Closing -> Closed
//!
//! Sending messages and topics from `Active` never changes the state, even
//! when the call fails.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::matrix::MatrixError;

/// The handful of messaging-service calls the bridge makes.
#[async_trait]
pub trait Messenger: Send {
    /// Returns the fully-qualified user id the server assigned.
    async fn login(&mut self, user: &str, password: &str) -> Result<String, MatrixError>;
    async fn resolve_alias(&mut self, alias: &str) -> Result<String, MatrixError>;
    /// Returns the internal id of the joined room.
    async fn join(&mut self, room: &str) -> Result<String, MatrixError>;
    async fn send_message(
        &mut self,
        room_id: &str,
        body: &str,
        formatted_body: &str,
    ) -> Result<String, MatrixError>;
    async fn set_topic(&mut self, room_id: &str, topic: &str) -> Result<String, MatrixError>;
    async fn logout(&mut self) -> Result<(), MatrixError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    Resolving,
    Joining,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to log in: {0}")]
    Auth(#[source] MatrixError),

    #[error("failed to resolve room {alias}: {source}")]
    Resolution { alias: String, source: MatrixError },

    #[error("failed to join room {room}: {source}")]
    Join { room: String, source: MatrixError },

    #[error("failed to send message: {0}")]
    Send(#[source] MatrixError),

    #[error("failed to update room topic: {0}")]
    Topic(#[source] MatrixError),

    #[error("cannot {operation} while session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl SessionError {
    /// Setup failures end the process; send/topic failures do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Send(_) | Self::Topic(_))
    }
}

/// Aliases are human-readable room pointers (`#name:server`).
pub fn is_room_alias(room: &str) -> bool {
    room.starts_with('#')
}

/// Owns the messenger and tracks where the session is in its lifecycle.
pub struct SessionManager<M> {
    messenger: M,
    state: SessionState,
    user_id: Option<String>,
    room_id: Option<String>,
    logged_in: bool,
}

impl<M: Messenger> SessionManager<M> {
    pub fn new(messenger: M) -> Self {
        Self {
            messenger,
            state: SessionState::Disconnected,
            user_id: None,
            room_id: None,
            logged_in: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Internal id of the joined room, once resolved.
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    pub async fn connect(&mut self, user: &str, password: &str) -> Result<(), SessionError> {
        self.expect_state("connect", &[SessionState::Disconnected])?;
        self.state = SessionState::Authenticating;

        info!("Logging in to matrix as {}...", user);
        match self.messenger.login(user, password).await {
            Ok(user_id) => {
                info!("Logged in successfully as {}.", user_id);
                self.user_id = Some(user_id);
                self.logged_in = true;
                Ok(())
            }
            Err(e) => {
                error!("Failed to log in to Matrix: {}", e);
                self.close().await;
                Err(SessionError::Auth(e))
            }
        }
    }

    /// Resolves `room` if it is an alias, then joins it. On failure the
    /// session is closed before the error is returned.
    pub async fn resolve_and_join(&mut self, room: &str) -> Result<String, SessionError> {
        self.expect_state("join a room", &[SessionState::Authenticating])?;

        let room_id = if is_room_alias(room) {
            self.state = SessionState::Resolving;
            info!("Resolving room alias {}...", room);
            match self.messenger.resolve_alias(room).await {
                Ok(id) => {
                    info!("Resolved to internal room ID {}.", id);
                    id
                }
                Err(source) => {
                    error!("Failed to resolve room {}: {}", room, source);
                    self.close().await;
                    return Err(SessionError::Resolution {
                        alias: room.to_string(),
                        source,
                    });
                }
            }
        } else {
            room.to_string()
        };

        self.state = SessionState::Joining;
        info!("Joining target room {}...", room_id);
        if let Err(source) = self.messenger.join(&room_id).await {
            error!("Failed to join room {}: {}", room_id, source);
            self.close().await;
            return Err(SessionError::Join {
                room: room_id,
                source,
            });
        }

        self.state = SessionState::Active;
        self.room_id = Some(room_id.clone());
        Ok(room_id)
    }

    /// `connect` followed by `resolve_and_join`.
    pub async fn establish(
        &mut self,
        user: &str,
        password: &str,
        room: &str,
    ) -> Result<String, SessionError> {
        self.connect(user, password).await?;
        self.resolve_and_join(room).await
    }

    fn active_room(&self, operation: &'static str) -> Result<String, SessionError> {
        self.expect_state(operation, &[SessionState::Active])?;
        self.room_id.clone().ok_or(SessionError::InvalidState {
            operation,
            state: self.state,
        })
    }

    /// Posts `text` as both the plain and the HTML body.
    pub async fn send_message(&mut self, text: &str) -> Result<String, SessionError> {
        let room_id = self.active_room("send a message")?;
        self.messenger
            .send_message(&room_id, text, text)
            .await
            .map_err(SessionError::Send)
    }

    pub async fn update_topic(&mut self, topic: &str) -> Result<String, SessionError> {
        let room_id = self.active_room("update the topic")?;
        self.messenger
            .set_topic(&room_id, topic)
            .await
            .map_err(SessionError::Topic)
    }

    /// Logs out (if logged in) and marks the session closed. Safe to call
    /// from any state; only the first call does anything.
    pub async fn close(&mut self) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;

        if self.logged_in {
            info!("Logging out and closing Matrix client...");
            if let Err(e) = self.messenger.logout().await {
                warn!("Logout failed: {}", e);
            }
            self.logged_in = false;
        }

        self.state = SessionState::Closed;
    }
}
