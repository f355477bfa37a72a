//! RTSP client session
//!
//! Negotiates a single video track with the camera over TCP-interleaved
//! RTP and hands every received packet of that track to a registered
//! handler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::BytesMut;
use futures::future::BoxFuture;
use parking_lot::{Mutex as ParkingMutex, RwLock};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::codec::{select_codec, CodecSelection, DetectedCodec};
use super::connection::{
    next_frame, parse_interleaved_channels, parse_session_header, ControlChannel, Frame,
    RtspConnection, RtspMethod, RtspResponse, RtspTarget,
};
use super::packet::RtpPacket;
use super::sdp::{resolve_control_url, MediaTrack, SessionDescription};
use crate::config::RtspClientConfig;
use crate::error::RtspError;

/// Async consumer of RTP packets. Awaited in the network read task.
pub type PacketHandler = Box<dyn Fn(RtpPacket) -> BoxFuture<'static, ()> + Send + Sync>;

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything negotiated with the camera
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    /// Request URL without credentials
    pub url: String,
    /// Base URL controls are resolved against
    pub base_url: String,
    pub session_id: String,
    pub session_timeout_secs: u64,
    pub rtp_channel: u8,
    pub rtcp_channel: u8,
    pub tracks: Vec<MediaTrack>,
    pub selection: CodecSelection,
}

impl SessionDescriptor {
    pub fn selected_track(&self) -> Option<&MediaTrack> {
        self.tracks.get(self.selection.track_index)
    }
}

/// Tasks and control channel of a playing session
struct Playback {
    control: Arc<Mutex<ControlChannel>>,
    aggregate_url: Url,
    read_task: JoinHandle<()>,
    keepalive_task: JoinHandle<()>,
}

/// Client side of one RTSP session
pub struct RtspSession {
    url: String,
    config: RtspClientConfig,
    connected: AtomicBool,
    closed: AtomicBool,
    codec: RwLock<DetectedCodec>,
    descriptor: RwLock<Option<Arc<SessionDescriptor>>>,
    handler: Arc<ArcSwapOption<PacketHandler>>,
    packets_received: Arc<AtomicU64>,
    playback: ParkingMutex<Option<Playback>>,
}

impl RtspSession {
    pub fn new(url: impl Into<String>, config: RtspClientConfig) -> Self {
        Self {
            url: url.into(),
            config,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            codec: RwLock::new(DetectedCodec::Unsupported),
            descriptor: RwLock::new(None),
            handler: Arc::new(ArcSwapOption::empty()),
            packets_received: Arc::new(AtomicU64::new(0)),
            playback: ParkingMutex::new(None),
        }
    }

    /// Connect to the camera, pick the first H264/H265 format and start
    /// playback. Packets flow to the handler once one is registered.
    pub async fn connect(&self) -> Result<(), RtspError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtspError::Transport("session is closed".to_string()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(RtspError::AlreadyConnected);
        }

        match self.negotiate().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn negotiate(&self) -> Result<(), RtspError> {
        let target = RtspTarget::parse(&self.url)?;
        info!("Connecting to RTSP camera at {}", target.url);

        let mut conn =
            RtspConnection::open(&target, &self.config.user_agent, self.config.timeout()).await?;

        let options = conn.request(RtspMethod::Options, &target.url, &[]).await?;
        if !options.is_success() {
            debug!("OPTIONS returned {:?}, continuing", options.status);
        }

        let describe = conn
            .request(
                RtspMethod::Describe,
                &target.url,
                &[("Accept", "application/sdp".to_string())],
            )
            .await?;
        if !describe.is_success() {
            return Err(RtspError::Transport(format!(
                "DESCRIBE returned {:?}",
                describe.status
            )));
        }

        let description = SessionDescription::parse(&describe.body).map_err(RtspError::Transport)?;
        debug!(
            "Camera advertises {} media track(s)",
            description.tracks.len()
        );

        let selection = select_codec(&description.tracks).ok_or(RtspError::NoSupportedCodec)?;
        let track = &description.tracks[selection.track_index];
        info!(
            "Selected {} track {} (payload type {})",
            selection.codec, selection.track_index, selection.payload_type
        );

        let base_url = base_url(&describe, &target.url);
        let track_url = parse_control_url(
            &resolve_control_url(&base_url, track.control.as_deref()),
            RtspError::Setup,
        )?;
        let aggregate_url = parse_control_url(
            &resolve_control_url(&base_url, description.control.as_deref()),
            RtspError::Play,
        )?;

        let setup = conn
            .request(
                RtspMethod::Setup,
                &track_url,
                &[(
                    "Transport",
                    "RTP/AVP/TCP;unicast;interleaved=0-1".to_string(),
                )],
            )
            .await
            .map_err(|e| step_error(e, RtspError::Setup))?;
        if !setup.is_success() {
            return Err(RtspError::Setup(format!(
                "SETUP {} returned {:?}",
                track_url, setup.status
            )));
        }

        let (session_id, session_timeout_secs) = setup
            .header("session")
            .map(parse_session_header)
            .filter(|(id, _)| !id.is_empty())
            .ok_or_else(|| RtspError::Setup("SETUP response has no Session header".to_string()))?;
        let (rtp_channel, rtcp_channel) = setup
            .header("transport")
            .and_then(parse_interleaved_channels)
            .unwrap_or((0, 1));
        debug!(
            "RTSP session {} (timeout {}s), interleaved channels {}-{}",
            session_id, session_timeout_secs, rtp_channel, rtcp_channel
        );

        conn.set_session(session_id.clone());
        let play = conn
            .request(
                RtspMethod::Play,
                &aggregate_url,
                &[("Range", "npt=0.000-".to_string())],
            )
            .await
            .map_err(|e| step_error(e, RtspError::Play))?;
        if !play.is_success() {
            return Err(RtspError::Play(format!("PLAY returned {:?}", play.status)));
        }

        let descriptor = SessionDescriptor {
            url: target.url.to_string(),
            base_url,
            session_id,
            session_timeout_secs,
            rtp_channel,
            rtcp_channel,
            tracks: description.tracks.clone(),
            selection,
        };

        let (reader, buffered, control) = conn.into_streaming();
        let control = Arc::new(Mutex::new(control));

        let read_task = tokio::spawn(read_loop(
            reader,
            buffered,
            rtp_channel,
            selection.payload_type,
            self.handler.clone(),
            self.packets_received.clone(),
        ));
        let keepalive_task = tokio::spawn(keepalive_loop(
            control.clone(),
            aggregate_url.clone(),
            keepalive_interval(session_timeout_secs),
        ));

        let playback = Playback {
            control,
            aggregate_url,
            read_task,
            keepalive_task,
        };

        {
            let mut slot = self.playback.lock();
            if self.closed.load(Ordering::SeqCst) {
                playback.read_task.abort();
                playback.keepalive_task.abort();
                return Err(RtspError::Transport(
                    "session closed during connect".to_string(),
                ));
            }
            *slot = Some(playback);
        }

        *self.codec.write() = selection.codec;
        *self.descriptor.write() = Some(Arc::new(descriptor));
        info!("RTSP playback started ({})", selection.codec);

        Ok(())
    }

    /// Register the packet consumer, replacing any previous one
    pub fn set_packet_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(RtpPacket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: PacketHandler = Box::new(move |packet| Box::pin(handler(packet)));
        self.handler.store(Some(Arc::new(handler)));
    }

    pub fn clear_packet_handler(&self) {
        self.handler.store(None);
    }

    /// Detected codec, `Unsupported` until connect succeeds
    pub fn codec(&self) -> DetectedCodec {
        *self.codec.read()
    }

    pub fn descriptor(&self) -> Option<Arc<SessionDescriptor>> {
        self.descriptor.read().clone()
    }

    /// Packets of the selected track received so far
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.playback.lock().is_some()
    }

    /// Tear down the session. Safe to call repeatedly or before connect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let playback = self.playback.lock().take();
        let Some(playback) = playback else {
            debug!("RTSP session closed before playback started");
            return;
        };

        playback.keepalive_task.abort();
        {
            let mut control = playback.control.lock().await;
            match tokio::time::timeout(
                TEARDOWN_TIMEOUT,
                control.send(RtspMethod::Teardown, &playback.aggregate_url),
            )
            .await
            {
                Ok(Ok(())) => debug!("TEARDOWN sent"),
                Ok(Err(e)) => debug!("TEARDOWN failed: {}", e),
                Err(_) => debug!("TEARDOWN timed out"),
            }
            control.shutdown().await;
        }
        playback.read_task.abort();
        self.descriptor.write().take();

        info!("RTSP session closed");
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        if let Some(playback) = self.playback.get_mut().take() {
            playback.keepalive_task.abort();
            playback.read_task.abort();
        }
    }
}

fn base_url(describe: &RtspResponse, request_url: &Url) -> String {
    describe
        .header("content-base")
        .or_else(|| describe.header("content-location"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| request_url.to_string())
}

fn parse_control_url(url: &str, kind: fn(String) -> RtspError) -> Result<Url, RtspError> {
    Url::parse(url).map_err(|e| kind(format!("invalid control URL {}: {}", url, e)))
}

/// Re-tag a transport failure with the step it happened in
fn step_error(err: RtspError, kind: fn(String) -> RtspError) -> RtspError {
    match err {
        RtspError::Transport(msg) => kind(msg),
        other => other,
    }
}

fn keepalive_interval(session_timeout_secs: u64) -> Duration {
    Duration::from_secs((session_timeout_secs / 2).max(1))
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    mut buf: BytesMut,
    rtp_channel: u8,
    payload_type: u8,
    handler: Arc<ArcSwapOption<PacketHandler>>,
    packets_received: Arc<AtomicU64>,
) {
    loop {
        while let Some(frame) = next_frame(&mut buf) {
            match frame {
                Frame::Interleaved { channel, payload } if channel == rtp_channel => {
                    let Some(packet) = RtpPacket::parse(payload) else {
                        trace!("Dropping malformed RTP packet");
                        continue;
                    };
                    if packet.payload_type() != payload_type {
                        continue;
                    }

                    packets_received.fetch_add(1, Ordering::Relaxed);
                    if let Some(handler) = handler.load_full() {
                        (handler.as_ref())(packet).await;
                    }
                }
                Frame::Interleaved { .. } => {}
                Frame::Response(response) => {
                    if !response.is_success() {
                        debug!("Camera answered {:?} during playback", response.status);
                    }
                }
                Frame::Request => trace!("Ignoring request from camera"),
                Frame::BadResponse(status_line) => {
                    debug!("Unparseable response during playback: {}", status_line)
                }
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                warn!("RTSP connection closed by camera");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("RTSP read error: {}", e);
                break;
            }
        }
    }
}

async fn keepalive_loop(control: Arc<Mutex<ControlChannel>>, url: Url, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let mut control = control.lock().await;
        if let Err(e) = control.send(RtspMethod::Options, &url).await {
            warn!("RTSP keepalive failed: {}", e);
            break;
        }
        trace!("RTSP keepalive sent");
    }
}
