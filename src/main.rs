use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_viewer::config::{AppConfig, CameraConfig, RtspClientConfig, TurnServer, WebConfig};
use camera_viewer::relay::Relay;
use camera_viewer::state::AppState;
use camera_viewer::web;
use camera_viewer::webrtc::WebRtcConfig;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// camera-viewer command line arguments
#[derive(Parser, Debug)]
#[command(name = "camera-viewer")]
#[command(version, about = "Relay an RTSP camera to a browser over WebRTC", long_about = None)]
struct CliArgs {
    /// Full camera URL (overrides the host/port/path parts)
    #[arg(long, env = "RTSP_URL", value_name = "URL")]
    rtsp_url: Option<String>,

    /// Camera username
    #[arg(long, env = "RTSP_USERNAME", default_value = "")]
    rtsp_username: String,

    /// Camera password
    #[arg(long, env = "RTSP_PASSWORD", default_value = "", hide_env_values = true)]
    rtsp_password: String,

    /// Camera host (required unless --rtsp-url is given)
    #[arg(long, env = "RTSP_HOST", value_name = "HOST")]
    rtsp_host: Option<String>,

    /// Camera RTSP port
    #[arg(long, env = "RTSP_PORT", default_value_t = 554)]
    rtsp_port: u16,

    /// Stream path including query string
    #[arg(long, env = "RTSP_PATH", default_value = camera_viewer::config::DEFAULT_RTSP_PATH)]
    rtsp_path: String,

    /// RTSP connect and request timeout in seconds
    #[arg(long, env = "RTSP_TIMEOUT_SECS", default_value_t = 10)]
    rtsp_timeout_secs: u64,

    /// STUN server URL (repeatable, or a comma separated list)
    #[arg(long = "stun-server", env = "STUN_SERVERS", value_delimiter = ',')]
    stun_servers: Vec<String>,

    /// TURN server URL
    #[arg(long, env = "TURN_SERVER", value_name = "URL")]
    turn_server: Option<String>,

    /// TURN username
    #[arg(long, env = "TURN_USERNAME", default_value = "")]
    turn_username: String,

    /// TURN password
    #[arg(long, env = "TURN_PASSWORD", default_value = "", hide_env_values = true)]
    turn_password: String,

    /// Listen address
    #[arg(short = 'a', long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    address: String,

    /// HTTP port
    #[arg(short = 'p', long, env = "HTTP_PORT", default_value_t = 8080)]
    port: u16,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    fn into_config(self) -> AppConfig {
        let turn_servers = match self.turn_server.filter(|url| !url.trim().is_empty()) {
            Some(url) => vec![TurnServer::new(url, self.turn_username, self.turn_password)],
            None => vec![],
        };

        AppConfig {
            camera: CameraConfig {
                url: self.rtsp_url,
                username: self.rtsp_username,
                password: self.rtsp_password,
                host: self.rtsp_host,
                port: self.rtsp_port,
                path: self.rtsp_path,
            },
            rtsp: RtspClientConfig {
                timeout_secs: self.rtsp_timeout_secs,
                ..Default::default()
            },
            webrtc: WebRtcConfig {
                stun_servers: WebRtcConfig::stun_servers_from_list(&self.stun_servers.join(",")),
                turn_servers,
                ..Default::default()
            },
            web: WebConfig {
                http_port: self.port,
                bind_address: self.address,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting camera-viewer v{}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config();
    let bind_addr = config
        .web
        .socket_addr()
        .map_err(|e| anyhow::anyhow!(e))?;

    let relay = match Relay::start(&config).await {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!("Failed to start relay: {}", e);
            return Err(e.into());
        }
    };

    let state = AppState::new(config, relay.clone());
    let app = web::create_router(state);

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", bind_addr, e);
            relay.shutdown().await;
            return Err(e.into());
        }
    };
    tracing::info!("Signaling server listening on http://{}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    relay.shutdown().await;
    if let Err(e) = served {
        tracing::error!("HTTP server error: {}", e);
        return Err(e.into());
    }

    tracing::info!("Bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camera_viewer=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "camera_viewer=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "camera_viewer=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "camera_viewer=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "camera_viewer=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "camera_viewer=trace,tower_http=debug,webrtc=debug",
    };

    // RUST_LOG takes priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
