//! Camera to browser relay
//!
//! Owns the RTSP session and the WebRTC peer and forwards every packet of
//! the selected camera track onto the peer's video track.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::rtsp::{DetectedCodec, RtspSession};
use crate::utils::LogThrottler;
use crate::warn_throttled;
use crate::webrtc::{ConnectionState, WebRtcPeer};

/// Seconds between two "failed to forward" log lines
const WRITE_ERROR_LOG_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default)]
pub struct RelayStats {
    packets_received: AtomicU64,
    packets_forwarded: AtomicU64,
    write_errors: AtomicU64,
    candidates_gathered: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            candidates_gathered: self.candidates_gathered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub packets_received: u64,
    pub packets_forwarded: u64,
    pub write_errors: u64,
    pub candidates_gathered: u64,
}

/// Relay state reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub codec: DetectedCodec,
    pub connection_state: ConnectionState,
    pub has_remote_description: bool,
    #[serde(flatten)]
    pub stats: RelayStatsSnapshot,
}

/// One camera session feeding one browser peer
pub struct Relay {
    session: Arc<RtspSession>,
    peer: Arc<WebRtcPeer>,
    stats: Arc<RelayStats>,
    throttler: Arc<LogThrottler>,
    shut_down: AtomicBool,
}

impl Relay {
    pub fn new(session: Arc<RtspSession>, peer: Arc<WebRtcPeer>) -> Self {
        Self {
            session,
            peer,
            stats: Arc::new(RelayStats::default()),
            throttler: Arc::new(LogThrottler::with_secs(WRITE_ERROR_LOG_INTERVAL_SECS)),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Connect to the camera, create the peer with a matching track and
    /// start forwarding
    pub async fn start(config: &AppConfig) -> Result<Arc<Self>> {
        let url = config.camera.rtsp_url().map_err(AppError::Config)?;

        let session = Arc::new(RtspSession::new(url, config.rtsp.clone()));
        session.connect().await?;

        let peer = match WebRtcPeer::create(&config.webrtc).await {
            Ok(peer) => Arc::new(peer),
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        let relay = Arc::new(Self::new(session, peer));
        let wired = match relay.create_track().await {
            Ok(()) => relay.bind(),
            Err(e) => Err(e),
        };
        if let Err(e) = wired {
            relay.shutdown().await;
            return Err(e);
        }

        info!("Relay started ({})", relay.codec());
        Ok(relay)
    }

    /// Create the peer's video track for the codec the camera negotiated
    pub async fn create_track(&self) -> Result<()> {
        self.peer.create_video_track(self.session.codec()).await?;
        Ok(())
    }

    /// Route camera packets to the video track. Requires the track to
    /// exist with the session's codec.
    pub fn bind(&self) -> Result<()> {
        let codec = self.session.codec();
        match self.peer.video_codec() {
            None => {
                return Err(AppError::Relay(
                    "cannot bind before the video track exists".to_string(),
                ))
            }
            Some(track_codec) if track_codec != codec => {
                return Err(AppError::Relay(format!(
                    "video track is {} but the camera sends {}",
                    track_codec, codec
                )))
            }
            Some(_) => {}
        }

        let peer = self.peer.clone();
        let stats = self.stats.clone();
        let throttler = self.throttler.clone();

        self.session.set_packet_handler(move |packet| {
            let peer = peer.clone();
            let stats = stats.clone();
            let throttler = throttler.clone();

            async move {
                stats.packets_received.fetch_add(1, Ordering::Relaxed);
                match peer.write_packet(&packet).await {
                    Ok(()) => {
                        stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        warn_throttled!(throttler, "rtp_write", "Failed to forward RTP packet: {}", e);
                    }
                }
            }
        });

        let stats = self.stats.clone();
        self.peer.on_connection_state_change(move |state| match state {
            ConnectionState::Connected => {
                info!(
                    "Browser connected after {} camera packets",
                    stats.packets_received.load(Ordering::Relaxed)
                );
            }
            ConnectionState::Failed => {
                warn!(
                    "Browser connection failed, {} packets forwarded",
                    stats.packets_forwarded.load(Ordering::Relaxed)
                );
            }
            _ => {}
        });

        let stats = self.stats.clone();
        self.peer.on_ice_candidate(move |candidate| {
            stats.candidates_gathered.fetch_add(1, Ordering::Relaxed);
            info!("Local ICE candidate: {}", candidate.candidate);
        });

        info!("Forwarding {} packets to the video track", codec);
        Ok(())
    }

    pub fn session(&self) -> &Arc<RtspSession> {
        &self.session
    }

    pub fn peer(&self) -> &Arc<WebRtcPeer> {
        &self.peer
    }

    pub fn codec(&self) -> DetectedCodec {
        self.session.codec()
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn status(&self) -> RelayStatus {
        RelayStatus {
            codec: self.codec(),
            connection_state: self.peer.state(),
            has_remote_description: self.peer.has_remote_description().await,
            stats: self.stats(),
        }
    }

    /// Close both sides. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down relay");
        self.session.clear_packet_handler();
        self.session.close().await;
        self.peer.close().await;

        let stats = self.stats();
        info!(
            "Relay stopped: {} packets received, {} forwarded, {} write errors",
            stats.packets_received, stats.packets_forwarded, stats.write_errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RtspClientConfig;
    use crate::error::{PeerError, RtspError};
    use crate::rtsp::mock_camera::{MockCamera, MockCameraOptions, H264_SDP, H265_SDP};
    use crate::rtsp::packet::build_test_packet;
    use crate::webrtc::peer::tests::local_config;
    use std::time::Duration;

    fn config_for(camera: &MockCamera) -> AppConfig {
        let mut config = AppConfig::default();
        config.camera.url = Some(camera.url());
        config.rtsp = RtspClientConfig {
            timeout_secs: 2,
            ..Default::default()
        };
        config.webrtc = local_config();
        config
    }

    fn video_frames(payload_type: u8, count: u16) -> Vec<(u8, bytes::Bytes)> {
        (1..=count)
            .map(|seq| (0, build_test_packet(payload_type, seq, &[0x41, seq as u8])))
            .collect()
    }

    async fn wait_for_received(relay: &Relay, count: u64) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while relay.stats().packets_received < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("packets did not reach the handler");
    }

    #[tokio::test]
    async fn h264_camera_is_relayed() {
        let camera = MockCamera::start(MockCameraOptions {
            sdp: H264_SDP.to_string(),
            frames: video_frames(96, 5),
            frame_delay: Duration::from_millis(200),
            ..Default::default()
        })
        .await;

        let relay = Relay::start(&config_for(&camera)).await.expect("relay");
        assert_eq!(relay.codec(), DetectedCodec::H264);
        assert_eq!(relay.peer().video_codec(), Some(DetectedCodec::H264));

        wait_for_received(&relay, 5).await;
        let stats = relay.stats();
        assert_eq!(stats.packets_forwarded, 5);
        assert_eq!(stats.write_errors, 0);

        let offer = relay.peer().create_offer().await.expect("offer");
        assert!(offer.contains("H264/90000"));

        tokio::time::timeout(Duration::from_secs(3), async {
            while relay.stats().candidates_gathered == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no local candidate gathered");

        relay.shutdown().await;
        relay.shutdown().await;
        assert!(relay.peer().is_closed());
    }

    #[tokio::test]
    async fn h265_camera_gets_an_h265_track() {
        let camera = MockCamera::start(MockCameraOptions {
            sdp: H265_SDP.to_string(),
            ..Default::default()
        })
        .await;

        let relay = Relay::start(&config_for(&camera)).await.expect("relay");
        assert_eq!(relay.peer().video_codec(), Some(DetectedCodec::H265));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn unsupported_camera_aborts_startup() {
        let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=cam\r\nt=0 0\r\n\
m=video 0 RTP/AVP 26\r\na=control:trackID=0\r\n";
        let camera = MockCamera::start(MockCameraOptions {
            sdp: sdp.to_string(),
            ..Default::default()
        })
        .await;

        let result = Relay::start(&config_for(&camera)).await;
        assert!(matches!(
            result,
            Err(AppError::Rtsp(RtspError::NoSupportedCodec))
        ));
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_delivery() {
        let camera = MockCamera::start(MockCameraOptions {
            sdp: H264_SDP.to_string(),
            frames: video_frames(96, 4),
            frame_delay: Duration::from_millis(300),
            ..Default::default()
        })
        .await;

        let relay = Relay::start(&config_for(&camera)).await.expect("relay");
        relay.peer().close().await;

        wait_for_received(&relay, 4).await;
        let stats = relay.stats();
        assert_eq!(stats.write_errors, 4);
        assert_eq!(stats.packets_forwarded, 0);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn bind_requires_a_track() {
        let camera = MockCamera::start(MockCameraOptions::default()).await;
        let session = Arc::new(RtspSession::new(
            camera.url(),
            RtspClientConfig {
                timeout_secs: 2,
                ..Default::default()
            },
        ));
        session.connect().await.expect("connect");
        let peer = Arc::new(WebRtcPeer::create(&local_config()).await.expect("peer"));

        let relay = Relay::new(session, peer);
        assert!(matches!(relay.bind(), Err(AppError::Relay(_))));

        relay.create_track().await.expect("track");
        relay.bind().expect("bind");
        assert!(matches!(
            relay.create_track().await,
            Err(AppError::Peer(PeerError::TrackAlreadyExists))
        ));

        let status = relay.status().await;
        assert_eq!(status.codec, DetectedCodec::H264);
        assert_eq!(status.connection_state, ConnectionState::New);
        assert!(!status.has_remote_description);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn missing_camera_address_is_a_config_error() {
        let result = Relay::start(&AppConfig::default()).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
