//! Knock request assembly and response parsing.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use md5::{Digest, Md5};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::knock::{device_user_agent, new_checksum_uri, CRLF, MAX_KNOCK_RESPONSE};
use crate::socket::PeerRole;

fn status_line_rgx() -> &'static Regex {
    static RGX: OnceLock<Regex> = OnceLock::new();
    RGX.get_or_init(|| {
        Regex::new(r"^HTTP/([0-9](?:\.[0-9])?) ([0-9]{1,3}) [A-Za-z ]+").expect("static regex")
    })
}

fn websocket_accept_rgx() -> &'static Regex {
    static RGX: OnceLock<Regex> = OnceLock::new();
    RGX.get_or_init(|| {
        Regex::new(r"Sec-WebSocket-Accept: ([A-Za-z0-9+/]+={0,2})").expect("static regex")
    })
}

/// A crafted WebSocket-Upgrade request carrying role and identity.
#[derive(Debug, Clone)]
pub struct KnockRequest {
    gate_host: String,
    role: PeerRole,
    /// Base64 of the 16-byte MD5 of the secret: the identity beacon the
    /// relay matches peers by, not a nonce.
    ws_key: String,
}

impl KnockRequest {
    /// Build a knock request for the given secret, peer role, and gate host.
    pub fn new(secret: &str, role: PeerRole, gate_host: impl Into<String>) -> Self {
        let uid = Md5::digest(secret.as_bytes());
        Self {
            gate_host: gate_host.into(),
            role,
            ws_key: BASE64.encode(uid),
        }
    }

    /// Encode the request as wire bytes, CRLF-CRLF terminated.
    ///
    /// The URI path is freshly synthesised per call, so two encodings of
    /// the same request differ while encoding the same role.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(512);
        buf.extend_from_slice(
            format!("GET /{} HTTP/1.1{CRLF}", new_checksum_uri(self.role.tag())).as_bytes(),
        );
        buf.extend_from_slice(format!("Host: {}{CRLF}", self.gate_host).as_bytes());
        buf.extend_from_slice(format!("User-Agent: {}{CRLF}", device_user_agent()).as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Version: 13{CRLF}").as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}{CRLF}", self.ws_key).as_bytes());
        buf.extend_from_slice(format!("Connection: Upgrade{CRLF}").as_bytes());
        buf.extend_from_slice(format!("Upgrade: websocket{CRLF}").as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
        buf.to_vec()
    }
}

/// The relay's dispatch verdict, decoded from the Upgrade response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnockResponse {
    /// The relay switched protocols; the stream is now the raw post-knock
    /// byte stream.
    pub ok: bool,
    /// The relay injected a forward target via `Sec-WebSocket-Accept`.
    pub has_forward: bool,
    /// Decoded forward target bytes, empty unless `has_forward`.
    pub data: Vec<u8>,
}

/// Send the knock over `stream` and decode the relay's verdict.
///
/// The request goes out as a single write. The response header block is
/// consumed through its CRLF-CRLF terminator so no residual header bytes
/// pollute the post-knock stream; any body bytes already buffered past the
/// terminator only matter for the `426` error text.
pub async fn protocol_switch<S>(stream: &mut S, request: &KnockRequest) -> Result<KnockResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req = request.encode();
    stream.write_all(&req).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::WriteZero {
            Error::ProtocolSwitchFailed
        } else {
            Error::Network(e)
        }
    })?;
    stream.flush().await?;

    let (head, body) = read_header_block(stream).await?;

    let head_text = String::from_utf8_lossy(&head);
    let caps = status_line_rgx()
        .captures(&head_text)
        .ok_or(Error::InvalidProtocolSwitchResponse)?;

    match &caps[2] {
        "101" => {
            tracing::debug!(gate = %request.gate_host, "protocol switch accepted");
            let forward = websocket_accept_rgx()
                .captures(&head_text)
                .map(|c| BASE64.decode(&c[1]))
                .transpose()
                .map_err(|e| Error::invalid_message(format!("bad forward target: {e}")))?;
            Ok(KnockResponse {
                ok: true,
                has_forward: forward.is_some(),
                data: forward.unwrap_or_default(),
            })
        }
        "404" => Err(Error::PeerNotFound),
        "409" => Err(Error::AddressInUse),
        "426" => {
            let msg = String::from_utf8_lossy(&body).trim().to_string();
            if msg.is_empty() {
                Err(Error::UpgradeRequired("upgrade required".into()))
            } else {
                Err(Error::UpgradeRequired(msg))
            }
        }
        _ => Err(Error::InvalidProtocolSwitchResponse),
    }
}

/// Read the response up to and including CRLF-CRLF.
///
/// Returns the header block and whatever body bytes arrived in the same
/// reads. EOF before the terminator is a truncated response.
async fn read_header_block<S>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::FailedReadingProtocolSwitchResponse);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_terminator(&buf) {
            let body = buf.split_off(pos + 4);
            return Ok((buf, body));
        }
        if buf.len() > MAX_KNOCK_RESPONSE {
            return Err(Error::InvalidProtocolSwitchResponse);
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
