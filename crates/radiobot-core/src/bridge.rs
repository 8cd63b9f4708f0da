//! Ties the session and the poll loop together and guarantees the session
//! is closed on every way out.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::poll::{PollLoop, PollOptions};
use crate::session::{Messenger, SessionError, SessionManager};
use crate::status::StatusSource;

/// Runs the bridge until `cancel` fires.
///
/// Returns `Err` only when session setup fails. The session has already been
/// closed by the time this returns, whatever the outcome.
pub async fn run<M, S>(
    config: &Config,
    messenger: M,
    source: S,
    cancel: CancellationToken,
) -> Result<(), SessionError>
where
    M: Messenger,
    S: StatusSource,
{
    let mut session = SessionManager::new(messenger);

    let setup = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = session.establish(
            &config.matrix.user,
            &config.matrix.password,
            &config.matrix.room_id,
        ) => Some(result),
    };

    match setup {
        None => info!("Shutdown requested during setup."),
        Some(Err(e)) => {
            session.close().await;
            return Err(e);
        }
        Some(Ok(room_id)) => {
            info!("Bridging {} into room {}.", config.radio.api_url, room_id);
            PollLoop::new(source, &mut session, PollOptions::from_config(config))
                .run(cancel)
                .await;
        }
    }

    session.close().await;
    Ok(())
}
