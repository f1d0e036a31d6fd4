//! Data-channel protocol layer.
//!
//! Wire event types, the session configuration builder and the outbound
//! message service. Everything here is transport-agnostic: events go out as
//! JSON strings through the [`outbound::EventChannel`] seam and come in as
//! parsed [`events::ServerEvent`] values.

pub mod events;
pub mod outbound;
pub mod session;

pub use events::{ClientEvent, ServerEvent};
pub use outbound::{ChannelState, EventChannel, OutboundMessageService, SendError};
pub use session::{build_session_update, SessionConfig, SessionOptions};
