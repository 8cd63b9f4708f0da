//! The poll loop: fetch → normalize → detect change → notify → sleep.
//!
//! Each iteration is isolated. Fetch errors are warnings, messaging errors
//! are logged and swallowed, and a panic inside an iteration is caught so the
//! loop keeps going. Only cancellation ends it.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::change::{ChangeDetector, TrackChange};
use crate::config::Config;
use crate::session::{Messenger, SessionManager};
use crate::status::{StatusRecord, StatusSource};

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub send_messages: bool,
    pub update_topic: bool,
    /// Station name linked in the topic.
    pub radio_name: String,
    pub stream_url: String,
    /// Status endpoint, for log context only.
    pub api_url: String,
}

impl PollOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.radio.poll_interval(),
            send_messages: config.matrix.send_messages,
            update_topic: config.matrix.update_topic,
            radio_name: config.radio.name.clone(),
            stream_url: config.radio.stream_url.clone(),
            api_url: config.radio.api_url.clone(),
        }
    }
}

/// `🎵 Now playing: **<title>**`
pub fn now_playing_message(title: &str) -> String {
    format!("🎵 Now playing: **{}**", title)
}

/// `[<radio>](<stream>) - 🎵 Now playing: <title>`
pub fn now_playing_topic(radio_name: &str, stream_url: &str, title: &str) -> String {
    format!("[{}]({}) - 🎵 Now playing: {}", radio_name, stream_url, title)
}

/// Best-effort text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// What a single iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    FetchFailed,
    Unchanged { title: String },
    Announced {
        title: String,
        change: TrackChange,
        message_sent: Option<bool>,
        topic_updated: Option<bool>,
    },
    /// The iteration panicked; nothing was recorded.
    Crashed,
}

pub struct PollLoop<'a, S, M> {
    source: S,
    session: &'a mut SessionManager<M>,
    detector: ChangeDetector,
    options: PollOptions,
    /// Iterations started so far, for log context.
    iteration: u64,
}

impl<'a, S, M> PollLoop<'a, S, M>
where
    S: StatusSource,
    M: Messenger,
{
    pub fn new(source: S, session: &'a mut SessionManager<M>, options: PollOptions) -> Self {
        Self {
            source,
            session,
            detector: ChangeDetector::new(),
            options,
            iteration: 0,
        }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Polls until `cancel` fires. Cancellation is honored mid-iteration as
    /// well as during the sleep.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!("Starting to poll API every {}s.", self.options.interval.as_secs());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.poll_guarded() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }

        info!("Polling stopped.");
    }

    /// [`poll_once`](Self::poll_once) with panics turned into
    /// [`PollOutcome::Crashed`].
    pub async fn poll_guarded(&mut self) -> PollOutcome {
        match AssertUnwindSafe(self.poll_once()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    iteration = self.iteration,
                    previous = ?self.detector.previous(),
                    api_url = %self.options.api_url,
                    "Unexpected error checking radio status: {}",
                    panic_message(panic.as_ref())
                );
                PollOutcome::Crashed
            }
        }
    }

    pub async fn poll_once(&mut self) -> PollOutcome {
        self.iteration += 1;
        let payload = match self.source.fetch().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("HTTP error polling API: {}", e);
                return PollOutcome::FetchFailed;
            }
        };

        let record = StatusRecord::normalize(&payload);
        let title = record.display_title();
        debug!("Status: {:?}", record);

        let Some(change) = self.detector.classify(&title) else {
            return PollOutcome::Unchanged { title };
        };

        match &change {
            TrackChange::Initial => info!("📻 Initial song: {}", title),
            TrackChange::Changed { .. } => info!("🎵 Music changed: {}", title),
        }

        let message_sent = if self.options.send_messages {
            let message = now_playing_message(&title);
            Some(match self.session.send_message(&message).await {
                Ok(event_id) => {
                    debug!("Sent now-playing message {}", event_id);
                    true
                }
                Err(e) => {
                    error!("{}", e);
                    false
                }
            })
        } else {
            None
        };

        let topic_updated = if self.options.update_topic {
            let topic =
                now_playing_topic(&self.options.radio_name, &self.options.stream_url, &title);
            Some(match self.session.update_topic(&topic).await {
                Ok(_) => {
                    info!("Room topic updated to: {}", topic);
                    true
                }
                Err(e) => {
                    error!("{}", e);
                    false
                }
            })
        } else {
            None
        };

        // Advance regardless of dispatch results so a failed send is not retried.
        self.detector.advance(title.clone());

        PollOutcome::Announced {
            title,
            change,
            message_sent,
            topic_updated,
        }
    }
}
