//! SockJS framing and endpoint layout
//!
//! A SockJS server wraps every payload in a one-letter frame:
//!
//! ```text
//! o                      session open
//! h                      heartbeat
//! a["msg1","msg2"]       message array
//! c[3000,"Go away!"]     session closed
//! ```
//!
//! Per-session URLs hang off the endpoint as `<base>/<server>/<session>/<transport>`.

use crate::traits::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

/// Decode one SockJS frame
pub fn decode_frame(data: &str) -> Result<SockJsFrame> {
    let data = data.trim_end_matches(['\n', '\r']);
    let mut chars = data.chars();
    let kind = chars
        .next()
        .ok_or_else(|| PushSocketError::Frame("empty SockJS frame".into()))?;
    let rest = chars.as_str();

    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::Heartbeat),
        'a' => serde_json::from_str::<Vec<String>>(rest)
            .map(SockJsFrame::Messages)
            .map_err(|e| PushSocketError::Frame(format!("bad SockJS message array: {e}"))),
        'm' => serde_json::from_str::<String>(rest)
            .map(|m| SockJsFrame::Messages(vec![m]))
            .map_err(|e| PushSocketError::Frame(format!("bad SockJS message: {e}"))),
        'c' => {
            let (code, reason): (u16, String) = serde_json::from_str(rest)
                .map_err(|e| PushSocketError::Frame(format!("bad SockJS close frame: {e}")))?;
            Ok(SockJsFrame::Close { code, reason })
        }
        other => Err(PushSocketError::Frame(format!(
            "unknown SockJS frame type '{other}'"
        ))),
    }
}

/// Encode outbound payloads as a SockJS message array
pub fn encode_messages(messages: &[&str]) -> Result<String> {
    Ok(serde_json::to_string(messages)?)
}

/// Response of `GET <base>/info`
#[derive(Debug, Clone, Deserialize)]
pub struct SockJsInfo {
    #[serde(default = "default_websocket")]
    pub websocket: bool,
    #[serde(default)]
    pub cookie_needed: bool,
}

fn default_websocket() -> bool {
    true
}

/// A SockJS endpoint with this session's server and session ids
#[derive(Debug, Clone)]
pub struct SockJsEndpoint {
    base: Url,
    server_id: String,
    session_id: String,
}

impl SockJsEndpoint {
    /// Create an endpoint with freshly generated ids
    pub fn new(base: &str) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let server_id = format!("{:03}", rng.gen_range(0..1000));
        let session_id: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        Self::with_ids(base, server_id, session_id)
    }

    pub fn with_ids(
        base: &str,
        server_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        let base = Url::parse(base)?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(PushSocketError::Configuration(format!(
                    "SockJS endpoint needs http(s), got '{other}'"
                )))
            }
        }
        Ok(Self {
            base,
            server_id: server_id.into(),
            session_id: session_id.into(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn info_url(&self) -> Url {
        self.join("info")
    }

    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = self.session_url("websocket");
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| {
            PushSocketError::Configuration(format!("cannot derive {scheme} url from {}", self.base))
        })?;
        Ok(url)
    }

    pub fn xhr_streaming_url(&self) -> Url {
        self.session_url("xhr_streaming")
    }

    pub fn xhr_send_url(&self) -> Url {
        self.session_url("xhr_send")
    }

    fn session_url(&self, transport: &str) -> Url {
        self.join(&format!("{}/{}/{}", self.server_id, self.session_id, transport))
    }

    fn join(&self, suffix: &str) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), suffix);
        url.set_path(&path);
        url
    }
}
