//! WebRTC transport establishment.
//!
//! Builds the peer connection for a realtime session: local microphone
//! track, event data channel, SDP negotiation against the provider's HTTP
//! endpoint, and connectivity recovery. The exact establishment order
//! matters and is load-bearing: the audio track and the data channel must
//! both exist before the offer is created so they are represented in the
//! SDP, and the offer is only sent after ICE candidate gathering completes
//! (non-trickle negotiation).

mod negotiate;

pub use negotiate::exchange_sdp;

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::core::protocol::outbound::{ChannelState, EventChannel, SendError};

// =============================================================================
// Errors and configuration
// =============================================================================

#[derive(Debug, Error)]
pub enum TransportError {
    /// Local media could not be acquired
    #[error("media error: {0}")]
    Media(String),

    #[error(transparent)]
    Webrtc(#[from] webrtc::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The negotiation endpoint refused the offer
    #[error("negotiation rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("local description missing after candidate gathering")]
    MissingLocalDescription,
}

/// Static transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// SDP negotiation endpoint
    pub negotiation_url: String,
    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,
    /// Label for the protocol event channel
    pub data_channel_label: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            negotiation_url: "https://api.openai.com/v1/realtime".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            data_channel_label: "oai-events".to_string(),
        }
    }
}

// =============================================================================
// Local media
// =============================================================================

/// The outgoing microphone track with a mute gate.
///
/// The track is added to the connection muted; push-to-talk flips the gate.
/// Muting drops samples at the writer rather than renegotiating the track.
pub struct LocalAudioTrack {
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
}

impl LocalAudioTrack {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self { track, enabled: AtomicBool::new(false) }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        debug!(enabled, "local audio track gate changed");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Write one media sample; silently dropped while the gate is closed.
    pub async fn write_sample(&self, sample: &Sample) -> Result<(), TransportError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.track.write_sample(sample).await?;
        Ok(())
    }

    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }
}

/// Supplies the local audio track. Platform capture lives behind this seam.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire_audio_track(&self) -> Result<Arc<LocalAudioTrack>, TransportError>;
}

/// Media source backed by a static Opus sample track; the capture pipeline
/// feeds it through [`LocalAudioTrack::write_sample`].
pub struct OpusTrackSource {
    pub track_id: String,
    pub stream_id: String,
}

impl Default for OpusTrackSource {
    fn default() -> Self {
        Self { track_id: "mic-audio".to_string(), stream_id: "mic-stream".to_string() }
    }
}

#[async_trait]
impl MediaSource for OpusTrackSource {
    async fn acquire_audio_track(&self) -> Result<Arc<LocalAudioTrack>, TransportError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            self.track_id.clone(),
            self.stream_id.clone(),
        ));
        Ok(Arc::new(LocalAudioTrack::new(track)))
    }
}

// =============================================================================
// Connectivity recovery
// =============================================================================

/// Fire-and-forget notification callback.
pub type ConnectivityCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Caller-provided connectivity notifications.
#[derive(Clone, Default)]
pub struct ConnectivityHooks {
    pub on_disconnected: Option<ConnectivityCallback>,
    pub on_failed: Option<ConnectivityCallback>,
}

/// Seam for the recovery action taken on a disconnect.
#[async_trait]
pub trait ConnectivityRestart: Send + Sync {
    async fn restart(&self) -> Result<(), TransportError>;
}

/// React to an ICE connection state change.
///
/// `Disconnected` notifies and makes exactly one restart attempt;
/// `Failed` is terminal and only notifies. All other states are logged.
pub async fn dispatch_connectivity_change(
    state: RTCIceConnectionState,
    hooks: &ConnectivityHooks,
    restarter: &dyn ConnectivityRestart,
) {
    match state {
        RTCIceConnectionState::Disconnected => {
            warn!("ice connection lost; attempting restart");
            if let Some(hook) = hooks.on_disconnected.as_ref() {
                hook().await;
            }
            if let Err(e) = restarter.restart().await {
                error!(error = %e, "ice restart failed");
            }
        }
        RTCIceConnectionState::Failed => {
            error!("ice connection failed");
            if let Some(hook) = hooks.on_failed.as_ref() {
                hook().await;
            }
        }
        other => {
            debug!(state = %other, "ice connection state changed");
        }
    }
}

/// Restarts ICE on the live peer connection and renegotiates.
struct IceRestarter {
    peer_connection: Weak<RTCPeerConnection>,
    http: reqwest::Client,
    negotiation_url: String,
    bearer: String,
}

#[async_trait]
impl ConnectivityRestart for IceRestarter {
    async fn restart(&self) -> Result<(), TransportError> {
        let Some(pc) = self.peer_connection.upgrade() else {
            debug!("peer connection already dropped; skipping ice restart");
            return Ok(());
        };
        let offer = pc
            .create_offer(Some(RTCOfferOptions { ice_restart: true, ..Default::default() }))
            .await?;
        pc.set_local_description(offer).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        let _ = gathered.recv().await;
        let local = pc
            .local_description()
            .await
            .ok_or(TransportError::MissingLocalDescription)?;

        let answer_sdp =
            exchange_sdp(&self.http, &self.negotiation_url, &self.bearer, &local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp)?;
        pc.set_remote_description(answer).await?;
        info!("ice restart renegotiation complete");
        Ok(())
    }
}

// =============================================================================
// Event channel adapter
// =============================================================================

fn map_channel_state(state: RTCDataChannelState) -> ChannelState {
    match state {
        RTCDataChannelState::Connecting => ChannelState::Connecting,
        RTCDataChannelState::Open => ChannelState::Open,
        RTCDataChannelState::Closing => ChannelState::Closing,
        RTCDataChannelState::Closed | RTCDataChannelState::Unspecified => ChannelState::Closed,
    }
}

#[async_trait]
impl EventChannel for RTCDataChannel {
    fn state(&self) -> ChannelState {
        map_channel_state(self.ready_state())
    }

    async fn send_json(&self, payload: String) -> Result<(), SendError> {
        self.send_text(payload)
            .await
            .map(|_| ())
            .map_err(|e| SendError(e.to_string()))
    }
}

// =============================================================================
// Transport
// =============================================================================

/// A fully negotiated session.
pub struct EstablishedSession {
    pub peer_connection: Arc<RTCPeerConnection>,
    pub data_channel: Arc<RTCDataChannel>,
    pub local_audio_track: Arc<LocalAudioTrack>,
}

/// Establishes realtime sessions.
pub struct RealtimeTransport {
    config: TransportConfig,
    http: reqwest::Client,
    hooks: ConnectivityHooks,
}

impl RealtimeTransport {
    pub fn new(config: TransportConfig, http: reqwest::Client, hooks: ConnectivityHooks) -> Self {
        Self { config, http, hooks }
    }

    /// Run the full establishment sequence with a short-lived bearer
    /// credential.
    pub async fn establish(
        &self,
        credential: &str,
        media: &dyn MediaSource,
    ) -> Result<EstablishedSession, TransportError> {
        // Acquire media first so a permission failure aborts before any
        // network work; the track starts muted.
        let local_audio_track = media.acquire_audio_track().await?;
        local_audio_track.set_enabled(false);

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: vec![RTCIceServer {
                    urls: self.config.ice_servers.clone(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await?,
        );

        // Track and channel must precede the offer so both appear in it.
        peer_connection
            .add_track(local_audio_track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        let data_channel = peer_connection
            .create_data_channel(&self.config.data_channel_label, None)
            .await?;

        let offer = peer_connection.create_offer(None).await?;
        peer_connection.set_local_description(offer).await?;
        let mut gathered = peer_connection.gathering_complete_promise().await;
        let _ = gathered.recv().await;
        let local = peer_connection
            .local_description()
            .await
            .ok_or(TransportError::MissingLocalDescription)?;

        let answer_sdp =
            exchange_sdp(&self.http, &self.config.negotiation_url, credential, &local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp)?;
        peer_connection.set_remote_description(answer).await?;
        info!(label = %self.config.data_channel_label, "realtime session established");

        self.install_connectivity_observer(&peer_connection, credential);

        Ok(EstablishedSession { peer_connection, data_channel, local_audio_track })
    }

    fn install_connectivity_observer(
        &self,
        peer_connection: &Arc<RTCPeerConnection>,
        credential: &str,
    ) {
        let restarter = Arc::new(IceRestarter {
            peer_connection: Arc::downgrade(peer_connection),
            http: self.http.clone(),
            negotiation_url: self.config.negotiation_url.clone(),
            bearer: credential.to_string(),
        });
        let hooks = self.hooks.clone();
        peer_connection.on_ice_connection_state_change(Box::new(move |state| {
            let hooks = hooks.clone();
            let restarter = restarter.clone();
            Box::pin(async move {
                dispatch_connectivity_change(state, &hooks, restarter.as_ref()).await;
            })
        }));
    }
}

// =============================================================================
// Tests
// =============================================================================
