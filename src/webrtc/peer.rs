//! Browser-facing WebRTC peer connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use super::config::WebRtcConfig;
use super::signaling::{ConnectionState, IceCandidate};
use super::track::{h265_codec_parameters, VideoTrack};
use crate::error::PeerError;
use crate::rtsp::{DetectedCodec, RtpPacket};

/// Observer for connection state changes
pub type StateObserver = Box<dyn Fn(ConnectionState) + Send + Sync>;
/// Observer for locally gathered ICE candidates
pub type CandidateObserver = Box<dyn Fn(IceCandidate) + Send + Sync>;

/// Offer/answer progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalingPhase {
    Idle,
    OfferCreated,
    Answered,
}

/// Peer connection to the browser with one outbound video track
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    config: WebRtcConfig,
    /// Read on the packet path, so kept out of the signaling lock
    track: ArcSwapOption<VideoTrack>,
    signaling: Mutex<SignalingPhase>,
    state_rx: watch::Receiver<ConnectionState>,
    state_observer: Arc<ArcSwapOption<StateObserver>>,
    candidate_observer: Arc<ArcSwapOption<CandidateObserver>>,
    rtcp_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WebRtcPeer {
    /// Create a new peer connection
    pub async fn create(config: &WebRtcConfig) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();

        for params in h265_codec_parameters() {
            media_engine
                .register_codec(params, RTPCodecType::Video)
                .map_err(|e| PeerError::PeerInit(format!("Failed to register H.265 codec: {}", e)))?;
        }
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::PeerInit(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            PeerError::PeerInit(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| PeerError::PeerInit(e.to_string()))?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);

        let peer = Self {
            pc: Arc::new(pc),
            config: config.clone(),
            track: ArcSwapOption::empty(),
            signaling: Mutex::new(SignalingPhase::Idle),
            state_rx,
            state_observer: Arc::new(ArcSwapOption::empty()),
            candidate_observer: Arc::new(ArcSwapOption::empty()),
            rtcp_task: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        peer.setup_event_handlers(state_tx);

        info!(
            "WebRTC peer created ({} STUN, {} TURN server(s))",
            config.stun_servers.len(),
            config.turn_servers.len()
        );
        Ok(peer)
    }

    fn setup_event_handlers(&self, state_tx: watch::Sender<ConnectionState>) {
        let state_observer = self.state_observer.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state_observer = state_observer.clone();
                let new_state = ConnectionState::from_rtc(s);
                if let Some(new_state) = new_state {
                    if new_state == ConnectionState::Failed {
                        warn!("Peer connection failed");
                    } else {
                        info!("Peer connection state: {}", new_state);
                    }
                    let _ = state_tx.send(new_state);
                }

                Box::pin(async move {
                    if let (Some(new_state), Some(observer)) = (new_state, state_observer.load_full())
                    {
                        (observer.as_ref())(new_state);
                    }
                })
            }));

        let candidate_observer = self.candidate_observer.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidate_observer = candidate_observer.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };
                    match c.to_json() {
                        Ok(init) => {
                            let candidate = IceCandidate::from(init);
                            debug!("ICE candidate: {}", candidate.candidate);
                            if let Some(observer) = candidate_observer.load_full() {
                                (observer.as_ref())(candidate);
                            }
                        }
                        Err(e) => debug!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));
    }

    /// Create the outbound video track for `codec` and attach it
    pub async fn create_video_track(&self, codec: DetectedCodec) -> Result<(), PeerError> {
        let _phase = self.signaling.lock().await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::TrackCreate(
                "peer connection is closed".to_string(),
            ));
        }
        if self.track.load().is_some() {
            return Err(PeerError::TrackAlreadyExists);
        }

        let track = Arc::new(VideoTrack::new(codec)?);
        let sender = self
            .pc
            .add_track(track.as_track_local())
            .await
            .map_err(|e| PeerError::TrackAttach(e.to_string()))?;

        // Interceptors (NACK, reports) only run while RTCP is read
        let rtcp_task = tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
            debug!("RTCP reader stopped");
        });
        if let Some(previous) = self.rtcp_task.lock().replace(rtcp_task) {
            previous.abort();
        }

        self.track.store(Some(track));
        info!("{} video track added to peer connection", codec);
        Ok(())
    }

    /// Create an offer, wait for ICE gathering and return the local SDP
    pub async fn create_offer(&self) -> Result<String, PeerError> {
        let mut phase = self.signaling.lock().await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Offer("peer connection is closed".to_string()));
        }
        if self.track.load().is_none() {
            return Err(PeerError::Offer("video track not created".to_string()));
        }
        if *phase == SignalingPhase::Answered {
            return Err(PeerError::Offer(
                "answer already applied, renegotiation is not supported".to_string(),
            ));
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Offer(e.to_string()))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| PeerError::Offer(format!("Failed to set local description: {}", e)))?;

        let timeout = self.config.ice.gathering_timeout();
        if tokio::time::timeout(timeout, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering not complete after {:?}, sending partial candidates",
                timeout
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| PeerError::Offer("no local description".to_string()))?;

        *phase = SignalingPhase::OfferCreated;
        debug!("Created offer ({} bytes)", local.sdp.len());
        Ok(local.sdp)
    }

    /// Apply the browser's answer. Only one answer is accepted.
    pub async fn set_answer(&self, sdp: String) -> Result<(), PeerError> {
        let mut phase = self.signaling.lock().await;

        match *phase {
            SignalingPhase::Idle => {
                return Err(PeerError::Answer("no offer has been created".to_string()))
            }
            SignalingPhase::Answered => {
                return Err(PeerError::Answer("answer already applied".to_string()))
            }
            SignalingPhase::OfferCreated => {}
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Answer("peer connection is closed".to_string()));
        }

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| PeerError::Answer(format!("Invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| PeerError::Answer(format!("Failed to set remote description: {}", e)))?;

        *phase = SignalingPhase::Answered;
        info!("Remote answer applied");
        Ok(())
    }

    /// Forward one RTP packet onto the video track
    pub async fn write_packet(&self, packet: &RtpPacket) -> Result<(), PeerError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(PeerError::Write("peer connection is closed".to_string()));
        }
        let track = self.track.load_full().ok_or(PeerError::NoTrack)?;
        track.write_packet(packet).await
    }

    /// Replace the connection state observer
    pub fn on_connection_state_change<F>(&self, observer: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let observer: StateObserver = Box::new(observer);
        self.state_observer.store(Some(Arc::new(observer)));
    }

    /// Replace the ICE candidate observer
    pub fn on_ice_candidate<F>(&self, observer: F)
    where
        F: Fn(IceCandidate) + Send + Sync + 'static,
    {
        let observer: CandidateObserver = Box::new(observer);
        self.candidate_observer.store(Some(Arc::new(observer)));
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Codec of the video track, if created
    pub fn video_codec(&self) -> Option<DetectedCodec> {
        self.track.load().as_ref().map(|t| t.codec())
    }

    pub fn packets_written(&self) -> u64 {
        self.track
            .load()
            .as_ref()
            .map(|t| t.packets_written())
            .unwrap_or(0)
    }

    pub async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection. Later writes fail instead of panicking.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.rtcp_task.lock().take() {
            task.abort();
        }

        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        info!("Peer connection closed");
    }
}

fn ice_servers(config: &WebRtcConfig) -> Vec<RTCIceServer> {
    let mut ice_servers = vec![];

    for stun_url in &config.stun_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![stun_url.clone()],
            ..Default::default()
        });
    }

    for turn in &config.turn_servers {
        // webrtc-rs rejects TURN servers without credentials
        if turn.username.is_empty() || turn.credential.is_empty() {
            warn!(
                "Skipping TURN server {:?} - credentials required but missing",
                turn.urls
            );
            continue;
        }
        ice_servers.push(RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    ice_servers
}
