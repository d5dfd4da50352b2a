//! STOMP 1.2 frame codec
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body^@
//! ```
//!
//! Heart-beats are bare EOLs between frames. Header values are escaped
//! (`\\`, `\n`, `\r`, `\c`) in every frame except CONNECT and CONNECTED.

use crate::traits::*;
use std::fmt;

/// A heart-beat on the wire
pub const HEARTBEAT_EOL: &str = "\n";

/// Protocol versions offered in CONNECT
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Largest frame the decoder will buffer, headers and body included
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const NUL: char = '\0';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; repeated headers keep the first occurrence
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT frame carrying the bearer credential and heart-beat offer
    pub fn connect(host: &str, authorization: &str, heartbeat: (u64, u64)) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heartbeat.0, heartbeat.1))
            .header(AUTHORIZATION_HEADER, authorization)
    }

    pub fn subscribe(id: SubscriptionId, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id.to_string())
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: SubscriptionId) -> Self {
        Self::new(Command::Unsubscribe).header("id", id.to_string())
    }

    pub fn send(destination: &str, body: &str) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Server heart-beat header as `(outgoing, incoming)` milliseconds
    pub fn heartbeat(&self) -> (u64, u64) {
        self.get_header("heart-beat")
            .and_then(parse_heartbeat)
            .unwrap_or((0, 0))
    }

    /// Human-readable detail of an ERROR frame
    pub fn error_detail(&self) -> String {
        match self.get_header("message") {
            Some(message) if !message.is_empty() => message.to_string(),
            _ if !self.body.trim().is_empty() => self.body.trim().to_string(),
            _ => "broker sent ERROR frame without detail".to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get_header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }
}

fn parse_heartbeat(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(PushSocketError::Frame(format!(
                    "invalid header escape '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Streaming decoder that tolerates frames split across reads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed data and return every complete frame it finishes
    pub fn push(&mut self, data: &str) -> Result<Vec<Frame>> {
        self.buffer.push_str(data);
        let mut frames = Vec::new();

        loop {
            let skipped = self.buffer.len() - self.buffer.trim_start_matches(['\n', '\r']).len();
            if skipped > 0 {
                self.buffer.drain(..skipped);
            }
            if self.buffer.is_empty() {
                break;
            }
            match decode_one(&self.buffer)? {
                Some((frame, consumed)) => {
                    self.buffer.drain(..consumed);
                    frames.push(frame);
                }
                None => break,
            }
        }

        if self.buffer.len() > MAX_FRAME_BYTES {
            return Err(PushSocketError::Frame(format!(
                "incomplete frame exceeds {MAX_FRAME_BYTES} bytes"
            )));
        }
        Ok(frames)
    }
}

/// Decode the frame at the start of `data`, returning it with the bytes it used
fn decode_one(data: &str) -> Result<Option<(Frame, usize)>> {
    let Some((head_len, body_start)) = find_head_end(data) else {
        return Ok(None);
    };

    let mut lines = data[..head_len].split('\n').map(|l| l.trim_end_matches('\r'));
    let command_line = lines.next().unwrap_or_default();
    let command = Command::parse(command_line)
        .ok_or_else(|| PushSocketError::Frame(format!("unknown command '{command_line}'")))?;

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| PushSocketError::Frame(format!("malformed header '{line}'")))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| PushSocketError::Frame(format!("invalid content-length '{v}'")))
        })
        .transpose()?;

    let (body, consumed) = match content_length {
        Some(len) => {
            if len > MAX_FRAME_BYTES {
                return Err(PushSocketError::Frame(format!(
                    "content-length {len} exceeds {MAX_FRAME_BYTES} bytes"
                )));
            }
            let body_end = body_start
                .checked_add(len)
                .ok_or_else(|| PushSocketError::Frame(format!("content-length {len} overflows")))?;
            if data.len() <= body_end {
                return Ok(None);
            }
            let body = data.get(body_start..body_end).ok_or_else(|| {
                PushSocketError::Frame("content-length splits a character".into())
            })?;
            if !data[body_end..].starts_with(NUL) {
                return Err(PushSocketError::Frame(
                    "frame body not terminated by NUL".into(),
                ));
            }
            (body.to_string(), body_end + 1)
        }
        None => match data[body_start..].find(NUL) {
            Some(offset) => (
                data[body_start..body_start + offset].to_string(),
                body_start + offset + 1,
            ),
            None => return Ok(None),
        },
    };

    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        consumed,
    )))
}

/// Locate the blank line ending the header block
///
/// Returns the length of the command+headers section and the body offset.
fn find_head_end(data: &str) -> Option<(usize, usize)> {
    let lf = data.find("\n\n").map(|i| (i, i + 2));
    let crlf = data.find("\r\n\r\n").map(|i| (i, i + 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}
