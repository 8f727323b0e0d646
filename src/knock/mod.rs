//! The rendezvous knock.
//!
//! A knock is an HTTP/1.1 WebSocket-Upgrade request used purely as
//! disguise: the URI path steganographically encodes the peer role (its
//! byte checksum equals the role tag) and the `Sec-WebSocket-Key` header
//! carries the peer identity digest the relay matches peers by. The
//! relay's answer is a plain HTTP status line; after a `101` the stream
//! continues as a raw byte stream with no WebSocket framing.

mod checksum;
mod request;
mod user_agent;

pub use checksum::{checksum, new_checksum_uri, new_checksum_uri_with, random_string};
pub use request::{protocol_switch, KnockRequest, KnockResponse};
pub use user_agent::{device_user_agent, user_agent_for};

/// Constant base for knock URI checksums.
pub const CHECKSUM_BASE: u8 = 0xEE;

/// Characters a knock URI may be built from.
pub const URI_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";

/// HTTP line terminator.
pub const CRLF: &str = "\r\n";

/// Upper bound on the knock response header block.
pub const MAX_KNOCK_RESPONSE: usize = 4096;
