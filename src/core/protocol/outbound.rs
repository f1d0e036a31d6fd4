//! Outbound message service.
//!
//! Sending a typed user message is a two-event sequence on the data channel:
//! a `conversation.item.create` followed by a `response.create`. The service
//! validates channel readiness before sending and reports a boolean outcome
//! to the caller; send failures are logged here, never propagated as panics.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use super::events::ClientEvent;

/// Readiness of the underlying event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A single send over the event channel failed.
#[derive(Debug, Error)]
#[error("event channel send failed: {0}")]
pub struct SendError(pub String);

/// Minimal surface of the data channel the service depends on.
#[async_trait]
pub trait EventChannel: Send + Sync {
    fn state(&self) -> ChannelState;
    async fn send_json(&self, payload: String) -> Result<(), SendError>;
}

/// Resolves the current channel, if any. The channel is owned by the
/// transport session and may be replaced across reconnects, so the service
/// re-resolves it on every send.
pub type ChannelGetter = Arc<dyn Fn() -> Option<Arc<dyn EventChannel>> + Send + Sync>;

/// Produces event ids for outbound events.
pub type EventIdSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Sends typed user messages over the session's data channel.
pub struct OutboundMessageService {
    channel: ChannelGetter,
    event_ids: EventIdSource,
}

impl OutboundMessageService {
    pub fn new(channel: ChannelGetter) -> Self {
        Self {
            channel,
            event_ids: Arc::new(|| Uuid::new_v4().to_string()),
        }
    }

    /// Override the event id source. Used by tests to get stable ids.
    pub fn with_event_ids(mut self, event_ids: EventIdSource) -> Self {
        self.event_ids = event_ids;
        self
    }

    /// Send `text` as a user conversation item and request a response.
    ///
    /// Returns `true` only if both events were handed to the channel. No
    /// partial-failure recovery is attempted: if the item was sent but the
    /// response request fails, the caller still sees `false`.
    pub async fn send_text(&self, text: &str) -> bool {
        let Some(channel) = (self.channel)() else {
            error!("cannot send text message: no event channel");
            return false;
        };
        let state = channel.state();
        if state != ChannelState::Open {
            error!(?state, "cannot send text message: event channel not open");
            return false;
        }

        let item = ClientEvent::user_text_item((self.event_ids)(), text);
        let request = ClientEvent::response_create((self.event_ids)());
        for event in [item, request] {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "failed to serialize outbound event");
                    return false;
                }
            };
            if let Err(e) = channel.send_json(payload).await {
                error!(error = %e, "failed to send outbound event");
                return false;
            }
        }
        debug!(chars = text.chars().count(), "sent user text message");
        true
    }
}
