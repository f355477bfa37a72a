//! In-process RTSP camera for tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rtsp_types as rtsp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const H264_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Mock Camera\r\n\
c=IN IP4 0.0.0.0\r\n\
t=0 0\r\n\
a=control:*\r\n\
m=audio 0 RTP/AVP 8\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=control:trackID=1\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;profile-level-id=42e01f\r\n\
a=control:trackID=0\r\n";

pub const H265_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Mock Camera\r\n\
c=IN IP4 0.0.0.0\r\n\
t=0 0\r\n\
a=control:*\r\n\
m=video 0 RTP/AVP 98\r\n\
a=rtpmap:98 H265/90000\r\n\
a=control:trackID=0\r\n";

const REALM: &str = "mock";
const NONCE: &str = "0d3f5a9c";

pub struct MockCameraOptions {
    pub sdp: String,
    /// `(channel, payload)` frames written after PLAY
    pub frames: Vec<(u8, Bytes)>,
    /// Pause between the PLAY response and the first frame
    pub frame_delay: Duration,
    /// Require Digest authentication with these credentials
    pub credentials: Option<(String, String)>,
    /// Answer this method with 500
    pub fail_method: Option<String>,
    pub session_header: String,
}

impl Default for MockCameraOptions {
    fn default() -> Self {
        Self {
            sdp: H264_SDP.to_string(),
            frames: Vec::new(),
            frame_delay: Duration::ZERO,
            credentials: None,
            fail_method: None,
            session_header: "12345678;timeout=60".to_string(),
        }
    }
}

/// `(method, uri)` of every request received
type RequestLog = Arc<Mutex<Vec<(String, String)>>>;

pub struct MockCamera {
    addr: SocketAddr,
    log: RequestLog,
    task: JoinHandle<()>,
}

impl MockCamera {
    pub async fn start(options: MockCameraOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock camera");
        let addr = listener.local_addr().expect("mock camera address");
        let log = RequestLog::default();
        let options = Arc::new(options);

        let task = {
            let log = log.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let log = log.clone();
                    let options = options.clone();
                    tokio::spawn(async move {
                        serve(stream, addr, options, log).await;
                    });
                }
            })
        };

        Self { addr, log, task }
    }

    pub fn url(&self) -> String {
        format!("rtsp://{}/live", self.addr)
    }

    pub fn methods(&self) -> Vec<String> {
        self.log.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn setup_uris(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|(m, _)| m == "SETUP")
            .map(|(_, uri)| uri.clone())
            .collect()
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    addr: SocketAddr,
    options: Arc<MockCameraOptions>,
    log: RequestLog,
) {
    let mut buf: Vec<u8> = Vec::new();

    loop {
        loop {
            let parsed: Result<(rtsp::Message<Vec<u8>>, usize), rtsp::ParseError> =
                rtsp::Message::parse(&buf[..]);
            let Ok((message, consumed)) = parsed else {
                break;
            };
            let raw: Vec<u8> = buf.drain(..consumed).collect();
            let rtsp::Message::Request(request) = message else {
                continue;
            };

            let line = String::from_utf8_lossy(&raw).to_string();
            let mut tokens = line.split_whitespace();
            let method = tokens.next().unwrap_or_default().to_string();
            let uri = tokens.next().unwrap_or_default().to_string();
            log.lock().push((method.clone(), uri.clone()));

            let mut headers = HashMap::new();
            for (name, value) in request.headers() {
                headers.insert(name.to_string().to_ascii_lowercase(), value.to_string());
            }

            if !handle(&mut stream, addr, &options, &method, &uri, &headers).await {
                return;
            }
        }

        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Answer one request. Returns false once the connection is unusable.
async fn handle(
    stream: &mut TcpStream,
    addr: SocketAddr,
    options: &MockCameraOptions,
    method: &str,
    uri: &str,
    headers: &HashMap<String, String>,
) -> bool {
    let cseq = headers.get("cseq").cloned().unwrap_or_else(|| "0".to_string());

    if let Some((username, password)) = &options.credentials {
        let authorized = headers
            .get("authorization")
            .is_some_and(|value| digest_matches(value, username, password, method, uri));
        if !authorized {
            let challenge = format!("Digest realm=\"{}\", nonce=\"{}\"", REALM, NONCE);
            return respond(
                stream,
                rtsp::StatusCode::Unauthorized,
                &cseq,
                &[("WWW-Authenticate", challenge)],
                "",
            )
            .await;
        }
    }

    if options.fail_method.as_deref() == Some(method) {
        return respond(stream, rtsp::StatusCode::InternalServerError, &cseq, &[], "").await;
    }

    match method {
        "OPTIONS" => {
            respond(
                stream,
                rtsp::StatusCode::Ok,
                &cseq,
                &[(
                    "Public",
                    "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN".to_string(),
                )],
                "",
            )
            .await
        }
        "DESCRIBE" => {
            respond(
                stream,
                rtsp::StatusCode::Ok,
                &cseq,
                &[
                    ("Content-Type", "application/sdp".to_string()),
                    ("Content-Base", format!("rtsp://{}/live/", addr)),
                ],
                &options.sdp,
            )
            .await
        }
        "SETUP" => {
            respond(
                stream,
                rtsp::StatusCode::Ok,
                &cseq,
                &[
                    (
                        "Transport",
                        "RTP/AVP/TCP;unicast;interleaved=0-1".to_string(),
                    ),
                    ("Session", options.session_header.clone()),
                ],
                "",
            )
            .await
        }
        "PLAY" => {
            if !respond(stream, rtsp::StatusCode::Ok, &cseq, &[], "").await {
                return false;
            }
            if !options.frame_delay.is_zero() {
                tokio::time::sleep(options.frame_delay).await;
            }
            for (channel, payload) in &options.frames {
                let mut frame = Vec::with_capacity(payload.len() + 4);
                frame.push(b'$');
                frame.push(*channel);
                frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                frame.extend_from_slice(payload);
                if stream.write_all(&frame).await.is_err() {
                    return false;
                }
            }
            true
        }
        _ => respond(stream, rtsp::StatusCode::Ok, &cseq, &[], "").await,
    }
}

async fn respond(
    stream: &mut TcpStream,
    status: rtsp::StatusCode,
    cseq: &str,
    extra_headers: &[(&str, String)],
    body: &str,
) -> bool {
    let mut builder =
        rtsp::Response::builder(rtsp::Version::V1_0, status).header(rtsp::headers::CSEQ, cseq);
    for (name, value) in extra_headers {
        let name = rtsp::HeaderName::try_from(*name).expect("valid header name");
        builder = builder.header(name, value.as_str());
    }

    let response = builder.build(body.as_bytes().to_vec());
    let mut data = Vec::new();
    response.write(&mut data).expect("serialize mock response");
    stream.write_all(&data).await.is_ok()
}

fn digest_matches(header: &str, username: &str, password: &str, method: &str, uri: &str) -> bool {
    let hex = |s: String| format!("{:x}", md5::compute(s.as_bytes()));
    let ha1 = hex(format!("{}:{}:{}", username, REALM, password));
    let ha2 = hex(format!("{}:{}", method, uri));
    let expected = hex(format!("{}:{}:{}", ha1, NONCE, ha2));

    header.starts_with("Digest ")
        && quoted_param(header, "username") == Some(username)
        && quoted_param(header, "uri") == Some(uri)
        && quoted_param(header, "response") == Some(expected.as_str())
}

fn quoted_param<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", name);
    let start = header.find(&needle)? + needle.len();
    let len = header[start..].find('"')?;
    Some(&header[start..start + len])
}
