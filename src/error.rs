//! Error types for QSocket operations.

use thiserror::Error;

/// Result type alias for QSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or using a QSocket connection.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation requires an established connection
    #[error("socket is not connected")]
    SocketNotConnected,

    /// Read/write attempted on a handle with no open layer
    #[error("socket not initiated")]
    UninitializedSocket,

    /// Configuration change attempted on an open handle
    #[error("socket already dialed")]
    SocketInUse,

    /// Certificate verification requires a TLS underlay
    #[error("TLS connection is not present")]
    NoTlsConnection,

    /// The relay's reply to the knock did not parse as an HTTP status line
    #[error("invalid protocol switch response")]
    InvalidProtocolSwitchResponse,

    /// The knock response ended before the header block was complete
    #[error("failed reading protocol switch response")]
    FailedReadingProtocolSwitchResponse,

    /// The knock request could not be delivered in full
    #[error("websocket protocol switch failed")]
    ProtocolSwitchFailed,

    /// Relay verdict: no counterpart is listening with this secret
    #[error("connection refused (no peer listening with given secret)")]
    PeerNotFound,

    /// Relay verdict: another server already holds this identity
    #[error("address in use (another server is listening with given secret)")]
    AddressInUse,

    /// Relay verdict: client must upgrade; carries the relay's message
    #[error("{0}")]
    UpgradeRequired(String),

    /// SRP authentication failed (proof or identity mismatch)
    #[error("SRP auth failed")]
    SrpFailed,

    /// No peer certificate matched the configured pin
    #[error("certificate fingerprint mismatch")]
    UntrustedCert,

    /// The configured pin is not a hex-encoded 32-byte SHA-256 digest
    #[error("invalid TLS certificate fingerprint")]
    InvalidCertFingerprint,

    /// A role byte outside the known peer tags
    #[error("invalid peer ID tag: 0x{0:02x}")]
    InvalidIdTag(u8),

    /// The splice terminated cleanly from one side
    #[error("QSocket session has ended")]
    SessionEnd,

    /// SOCKS5 proxy negotiation failed
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Malformed wire payload (socket specs, PAKE frame, forward target)
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

impl Error {
    /// Create a new proxy error
    pub fn proxy(msg: impl Into<String>) -> Self {
        Error::Proxy(msg.into())
    }

    /// Create a new invalid-message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Error::InvalidMessage(msg.into())
    }

    /// Check if this error is a relay dispatch verdict rather than a
    /// transport or protocol failure.
    pub fn is_relay_verdict(&self) -> bool {
        matches!(
            self,
            Error::PeerNotFound | Error::AddressInUse | Error::UpgradeRequired(_)
        )
    }

    /// Check if this error indicates misuse of the handle lifecycle.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Error::SocketNotConnected | Error::UninitializedSocket | Error::SocketInUse
        )
    }
}
