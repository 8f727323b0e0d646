//! # QSocket
//!
//! A client library that establishes an authenticated, end-to-end
//! encrypted, full-duplex byte stream between two peers who share only a
//! secret phrase. Both peers dial a well-known relay gateway (the QSRN
//! gate); the relay matches peers presenting compatible rendezvous
//! identifiers and splices their connections. Neither peer learns the
//! other's network address, and the relay never holds key material.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Application I/O                     │
//! ├─────────────────────────────────────────────────────────┤
//! │  E2E layer (AES-256-GCM framing over the PAKE key)      │
//! ├─────────────────────────────────────────────────────────┤
//! │  PAKE (SRP-6a, 4096-bit; secret never on the wire)      │
//! ├─────────────────────────────────────────────────────────┤
//! │  Knock (HTTP/1.1 Upgrade as steganographic rendezvous)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  Transport (TCP · TLS with pinning · SOCKS5 / Tor)      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Establishment runs dial → knock → SRP → E2E strictly in sequence; no
//! application bytes move during those phases. Afterwards every byte the
//! application writes traverses the E2E layer, then TLS where present,
//! then TCP.
//!
//! ## Example
//!
//! ```no_run
//! use qsocket::{PeerRole, QSocket};
//!
//! # async fn run() -> qsocket::Result<()> {
//! let mut sock = QSocket::new("knock knock");
//! sock.set_peer_role(PeerRole::Client)?;
//! sock.dial_tls().await?;
//! sock.write(b"hello counterpart").await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod crypto;
pub mod dial;
pub mod error;
pub mod knock;
pub mod pake;
pub mod socket;
pub mod specs;
pub mod splice;

pub use error::{Error, Result};
pub use socket::{PeerRole, QSocket};
pub use specs::{SocketSpecs, TermSize};
pub use splice::bind_sockets;

/// Static gate address for the QSocket network.
pub const QSRN_GATE: &str = "relay.qsocket.io";

/// Static onion address for the QSocket network, used in Tor mode.
pub const QSRN_TOR_GATE: &str =
    "5cah65fto4tjklhocryenlgti6bfnh4y5szjfvxeqqh3vvw2ff4uq2id.onion";

/// Default TCP port of the gate.
pub const QSRN_GATE_PORT: u16 = 80;

/// Default TLS port of the gate.
pub const QSRN_GATE_TLS_PORT: u16 = 443;

/// The well-known local Tor SOCKS5 endpoint; configuring it as the proxy
/// switches the dial to the onion gate.
pub const TOR_PROXY_ADDR: &str = "127.0.0.1:9050";
