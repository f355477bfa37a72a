//! RTSP client authentication (Basic and Digest)

use std::collections::HashMap;

use base64::Engine;
use rand::Rng;

/// Camera credentials taken from the URL userinfo
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Challenge from a `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic {
        realm: Option<String>,
    },
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
        qop: Option<String>,
    },
}

impl Challenge {
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header
            .split_once(char::is_whitespace)
            .unwrap_or((header, ""));
        let params = parse_auth_params(rest);

        if scheme.eq_ignore_ascii_case("digest") {
            // Only "auth" is implemented; auth-int needs the entity body
            let qop = params.get("qop").and_then(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .find(|q| q.eq_ignore_ascii_case("auth"))
                    .map(str::to_string)
            });
            Some(Challenge::Digest {
                realm: params.get("realm").cloned().unwrap_or_default(),
                nonce: params.get("nonce")?.clone(),
                opaque: params.get("opaque").cloned(),
                qop,
            })
        } else if scheme.eq_ignore_ascii_case("basic") {
            Some(Challenge::Basic {
                realm: params.get("realm").cloned(),
            })
        } else {
            None
        }
    }

    fn is_digest(&self) -> bool {
        matches!(self, Challenge::Digest { .. })
    }
}

/// Pick the strongest challenge out of possibly several header values
pub fn best_challenge<'a>(headers: impl IntoIterator<Item = &'a str>) -> Option<Challenge> {
    let mut best: Option<Challenge> = None;
    for challenge in headers.into_iter().filter_map(Challenge::parse) {
        if challenge.is_digest() {
            return Some(challenge);
        }
        best.get_or_insert(challenge);
    }
    best
}

/// Produces `Authorization` headers for every request once a challenge
/// has been answered
#[derive(Debug, Clone)]
pub struct Authenticator {
    credentials: Credentials,
    challenge: Challenge,
    nonce_count: u32,
}

impl Authenticator {
    pub fn new(credentials: Credentials, challenge: Challenge) -> Self {
        Self {
            credentials,
            challenge,
            nonce_count: 0,
        }
    }

    pub fn authorization(&mut self, method: &str, uri: &str) -> String {
        match &self.challenge {
            Challenge::Basic { .. } => {
                let token = base64::engine::general_purpose::STANDARD.encode(format!(
                    "{}:{}",
                    self.credentials.username, self.credentials.password
                ));
                format!("Basic {}", token)
            }
            Challenge::Digest {
                realm,
                nonce,
                opaque,
                qop,
            } => {
                let mut header = format!(
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
                    self.credentials.username, realm, nonce, uri
                );

                let response = match qop {
                    Some(qop) => {
                        self.nonce_count += 1;
                        let nc = format!("{:08x}", self.nonce_count);
                        let cnonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
                        let response = digest_response(
                            &self.credentials,
                            realm,
                            nonce,
                            method,
                            uri,
                            Some((qop, &nc, &cnonce)),
                        );
                        header.push_str(&format!(
                            ", qop={}, nc={}, cnonce=\"{}\"",
                            qop, nc, cnonce
                        ));
                        response
                    }
                    None => digest_response(&self.credentials, realm, nonce, method, uri, None),
                };

                header.push_str(&format!(", response=\"{}\"", response));
                if let Some(opaque) = opaque {
                    header.push_str(&format!(", opaque=\"{}\"", opaque));
                }
                header
            }
        }
    }
}

fn md5_hex(data: &str) -> String {
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// RFC 2617 request digest. `qop` carries `(qop, nc, cnonce)` when the
/// challenge asked for it.
fn digest_response(
    credentials: &Credentials,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
    qop: Option<(&str, &str, &str)>,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    match qop {
        Some((qop, nc, cnonce)) => md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, nc, cnonce, qop, ha2
        )),
        None => md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
    }
}

/// Parse `key=value, key="quoted, value"` pairs
fn parse_auth_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some((key, after_key)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after_key = after_key.trim_start();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after_key.find(',') {
                Some(end) => (after_key[..end].trim(), &after_key[end..]),
                None => (after_key.trim(), ""),
            }
        };

        if !key.is_empty() {
            params.insert(key, value.to_string());
        }
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digest_challenge() {
        let challenge = Challenge::parse(
            r#"Digest realm="Login to 4K05ABCPAG00000", nonce="a1b2c3", opaque="xyz", qop="auth,auth-int""#,
        )
        .expect("digest challenge");
        assert_eq!(
            challenge,
            Challenge::Digest {
                realm: "Login to 4K05ABCPAG00000".to_string(),
                nonce: "a1b2c3".to_string(),
                opaque: Some("xyz".to_string()),
                qop: Some("auth".to_string()),
            }
        );
    }

    #[test]
    fn digest_without_nonce_is_rejected() {
        assert_eq!(Challenge::parse(r#"Digest realm="cam""#), None);
        assert_eq!(Challenge::parse("Bearer token=1"), None);
    }

    #[test]
    fn digest_preferred_over_basic() {
        let headers = [
            r#"Basic realm="cam""#,
            r#"Digest realm="cam", nonce="n0""#,
        ];
        let challenge = best_challenge(headers).expect("challenge");
        assert!(challenge.is_digest());

        let basic_only = best_challenge([r#"Basic realm="cam""#]).expect("challenge");
        assert_eq!(
            basic_only,
            Challenge::Basic {
                realm: Some("cam".to_string())
            }
        );
    }

    #[test]
    fn rfc2617_digest_vector() {
        let credentials = Credentials::new("Mufasa", "Circle Of Life");
        let response = digest_response(
            &credentials,
            "testrealm@host.com",
            "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            "GET",
            "/dir/index.html",
            Some(("auth", "00000001", "0a4f113b")),
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn basic_authorization_header() {
        let mut auth = Authenticator::new(
            Credentials::new("admin", "secret"),
            Challenge::Basic { realm: None },
        );
        assert_eq!(
            auth.authorization("DESCRIBE", "rtsp://cam/live"),
            "Basic YWRtaW46c2VjcmV0"
        );
    }

    #[test]
    fn digest_authorization_header_without_qop() {
        let credentials = Credentials::new("admin", "secret");
        let mut auth = Authenticator::new(
            credentials.clone(),
            Challenge::Digest {
                realm: "cam".to_string(),
                nonce: "abc".to_string(),
                opaque: None,
                qop: None,
            },
        );
        let header = auth.authorization("DESCRIBE", "rtsp://cam/live");
        let expected =
            digest_response(&credentials, "cam", "abc", "DESCRIBE", "rtsp://cam/live", None);

        assert!(header.starts_with("Digest username=\"admin\", realm=\"cam\", nonce=\"abc\""));
        assert!(header.contains(&format!("response=\"{}\"", expected)));
        assert!(!header.contains("qop="));
    }

    #[test]
    fn digest_nonce_count_increments() {
        let mut auth = Authenticator::new(
            Credentials::new("admin", "secret"),
            Challenge::Digest {
                realm: "cam".to_string(),
                nonce: "abc".to_string(),
                opaque: Some("op".to_string()),
                qop: Some("auth".to_string()),
            },
        );
        let first = auth.authorization("SETUP", "rtsp://cam/live/trackID=0");
        let second = auth.authorization("PLAY", "rtsp://cam/live");
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
        assert!(second.contains("opaque=\"op\""));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("admin", "hunter2"));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
