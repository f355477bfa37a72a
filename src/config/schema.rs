use std::time::Duration;

use serde::{Deserialize, Serialize};

// Re-export WebRtcConfig from webrtc module
pub use crate::webrtc::config::{TurnServer, WebRtcConfig};

/// Default stream path used by Dahua-style cameras
pub const DEFAULT_RTSP_PATH: &str = "/cam/realmonitor?channel=1&subtype=0";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera address
    pub camera: CameraConfig,
    /// RTSP client behaviour
    pub rtsp: RtspClientConfig,
    /// Browser-facing peer connection settings
    pub webrtc: WebRtcConfig,
    /// Web server settings
    pub web: WebConfig,
}

/// Camera address configuration
///
/// Either a full `url` or the individual parts. A full URL wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Complete RTSP URL (credentials may be embedded)
    pub url: Option<String>,
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: u16,
    /// Path including query string
    pub path: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: String::new(),
            password: String::new(),
            host: None,
            port: 554,
            path: DEFAULT_RTSP_PATH.to_string(),
        }
    }
}

impl CameraConfig {
    /// Build the RTSP URL. Credentials are percent-encoded into the userinfo.
    pub fn rtsp_url(&self) -> Result<String, String> {
        if let Some(url) = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }

        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| "RTSP_HOST or RTSP_URL must be set".to_string())?;

        let userinfo = match (self.username.is_empty(), self.password.is_empty()) {
            (true, true) => String::new(),
            (false, true) => format!("{}@", urlencoding::encode(&self.username)),
            _ => format!(
                "{}:{}@",
                urlencoding::encode(&self.username),
                urlencoding::encode(&self.password)
            ),
        };

        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        Ok(format!("rtsp://{}{}:{}{}", userinfo, host, self.port, path))
    }
}

/// RTSP client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtspClientConfig {
    /// Connect and request/response timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent sent with every request
    pub user_agent: String,
}

impl Default for RtspClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: format!("camera-viewer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RtspClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

impl WebConfig {
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        let ip: std::net::IpAddr = self
            .bind_address
            .trim()
            .parse()
            .map_err(|e| format!("invalid bind address '{}': {}", self.bind_address, e))?;
        Ok(std::net::SocketAddr::new(ip, self.http_port))
    }
}
