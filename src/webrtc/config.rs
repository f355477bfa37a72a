//! WebRTC configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Public STUN server used when nothing else is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// ICE settings
    pub ice: IceConfig,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: vec![],
            ice: IceConfig::default(),
        }
    }
}

impl WebRtcConfig {
    /// Parse a comma separated STUN list, as found in `STUN_SERVERS`.
    /// An empty list falls back to the default server.
    pub fn stun_servers_from_list(list: &str) -> Vec<String> {
        let servers: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            servers
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp", "turn:turn.example.com:3478?transport=tcp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

impl TurnServer {
    /// Create a TurnServer with a single URL
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}

/// ICE configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IceConfig {
    /// ICE candidate gathering timeout (ms)
    pub gathering_timeout_ms: u64,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            gathering_timeout_ms: 5000,
        }
    }
}

impl IceConfig {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stun_list_parsing() {
        assert_eq!(
            WebRtcConfig::stun_servers_from_list(" stun:a:3478 , ,stun:b:19302"),
            vec!["stun:a:3478".to_string(), "stun:b:19302".to_string()]
        );
        assert_eq!(
            WebRtcConfig::stun_servers_from_list(""),
            vec![DEFAULT_STUN_SERVER.to_string()]
        );
    }
}
