//! The QSocket connection handle.
//!
//! A handle is constructed closed, configured, dialed once, used for I/O,
//! and closed. The stream stack is a tagged [`Layer`]: the variant in the
//! slot *is* the outermost active layer, so illegal stacks (an E2E layer
//! with no underlay, a second dial over a live session) cannot be
//! represented. Configuration setters refuse to touch an open handle.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;

use crate::crypto::EncryptedStream;
use crate::dial::{self, DialConfig, Transport};
use crate::error::{Error, Result};
use crate::knock::{protocol_switch, KnockRequest};
use crate::pake;
use crate::specs::{SocketSpecs, TermSize, MAX_SPECS};
use crate::{QSRN_GATE, QSRN_GATE_PORT, QSRN_GATE_TLS_PORT, TOR_PROXY_ADDR};

/// Peer role encoded into the knock URI checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerRole {
    /// Waits for a counterpart on the relay
    Server = 0x00,
    /// Connects to a waiting counterpart
    Client = 0x01,
}

impl PeerRole {
    /// The role byte the knock URI checksum must equal.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a role byte.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0x00 => Ok(PeerRole::Server),
            0x01 => Ok(PeerRole::Client),
            other => Err(Error::InvalidIdTag(other)),
        }
    }
}

/// The stream stack. The variant is the outermost active layer; reads and
/// writes on an inner layer are unreachable by construction.
pub(crate) enum Layer {
    /// Raw TCP or TLS-over-TCP, post knock
    Transport(Transport),
    /// Authenticated-encryption framing mounted after the PAKE
    Encrypted(EncryptedStream<Transport>),
}

impl Layer {
    fn transport(&self) -> &Transport {
        match self {
            Layer::Transport(t) => t,
            Layer::Encrypted(e) => e.get_ref(),
        }
    }
}

impl AsyncRead for Layer {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Layer::Transport(t) => Pin::new(t).poll_read(cx, buf),
            Layer::Encrypted(e) => Pin::new(e).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Layer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Layer::Transport(t) => Pin::new(t).poll_write(cx, buf),
            Layer::Encrypted(e) => Pin::new(e).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Layer::Transport(t) => Pin::new(t).poll_flush(cx),
            Layer::Encrypted(e) => Pin::new(e).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Layer::Transport(t) => Pin::new(t).poll_shutdown(cx),
            Layer::Encrypted(e) => Pin::new(e).poll_shutdown(cx),
        }
    }
}

/// A connection handle for the QSRN relay network.
///
/// The secret doubles as the rendezvous identity (the relay matches peers
/// by its MD5) and as the PAKE password; it never crosses the wire.
pub struct QSocket {
    secret: String,
    peer_role: PeerRole,
    e2e: bool,
    cert_pin: Option<[u8; 32]>,
    proxy: Option<String>,
    tor: bool,

    gate_host: String,
    gate_port: Option<u16>,

    command: Option<String>,
    forward_addr: Option<String>,
    term_size: Option<TermSize>,

    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,

    relay_forward: Option<Vec<u8>>,
    layer: Option<Layer>,
}

impl QSocket {
    /// Create a closed handle around the shared secret.
    ///
    /// Defaults: server role, end-to-end encryption enabled, no pin, no
    /// proxy, the well-known gate.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            peer_role: PeerRole::Server,
            e2e: true,
            cert_pin: None,
            proxy: None,
            tor: false,
            gate_host: QSRN_GATE.to_string(),
            gate_port: None,
            command: None,
            forward_addr: None,
            term_size: None,
            read_timeout: None,
            write_timeout: None,
            relay_forward: None,
            layer: None,
        }
    }

    fn ensure_closed(&self) -> Result<()> {
        if self.is_closed() {
            Ok(())
        } else {
            Err(Error::SocketInUse)
        }
    }

    /// Set the peer role. Fails on an open handle.
    pub fn set_peer_role(&mut self, role: PeerRole) -> Result<()> {
        self.ensure_closed()?;
        self.peer_role = role;
        Ok(())
    }

    /// Enable or disable the end-to-end layer. Fails on an open handle.
    pub fn set_e2e(&mut self, enabled: bool) -> Result<()> {
        self.ensure_closed()?;
        self.e2e = enabled;
        Ok(())
    }

    /// Pin the gate certificate to a hex-encoded 32-byte SHA-256 of its
    /// DER encoding. Fails on an open handle.
    pub fn set_cert_fingerprint(&mut self, fingerprint: &str) -> Result<()> {
        self.ensure_closed()?;
        let digest = hex::decode(fingerprint).map_err(|_| Error::InvalidCertFingerprint)?;
        let pin: [u8; 32] = digest
            .try_into()
            .map_err(|_| Error::InvalidCertFingerprint)?;
        self.cert_pin = Some(pin);
        Ok(())
    }

    /// Route the dial through a SOCKS5 proxy. The well-known Tor loopback
    /// switches the gate to its onion address. Fails on an open handle.
    pub fn set_proxy(&mut self, proxy_addr: impl Into<String>) -> Result<()> {
        self.ensure_closed()?;
        let proxy_addr = proxy_addr.into();
        self.tor = proxy_addr == TOR_PROXY_ADDR;
        self.proxy = Some(proxy_addr);
        Ok(())
    }

    /// Override the gate endpoint. Fails on an open handle.
    ///
    /// The port applies to both the plain and the TLS dial.
    pub fn set_gate(&mut self, host: impl Into<String>, port: u16) -> Result<()> {
        self.ensure_closed()?;
        self.gate_host = host.into();
        self.gate_port = Some(port);
        Ok(())
    }

    /// Set the command line carried in the socket specs. Fails on an open
    /// handle.
    pub fn set_command(&mut self, command: impl Into<String>) -> Result<()> {
        self.ensure_closed()?;
        self.command = Some(command.into());
        Ok(())
    }

    /// Set the forward address carried in the socket specs. Fails on an
    /// open handle.
    pub fn set_forward_addr(&mut self, addr: impl Into<String>) -> Result<()> {
        self.ensure_closed()?;
        self.forward_addr = Some(addr.into());
        Ok(())
    }

    /// Set the terminal dimensions carried in the socket specs. Fails on
    /// an open handle.
    pub fn set_term_size(&mut self, size: TermSize) -> Result<()> {
        self.ensure_closed()?;
        self.term_size = Some(size);
        Ok(())
    }

    /// Set the read deadline. `None` or a zero duration means reads do
    /// not time out.
    pub fn set_read_deadline(&mut self, t: Option<Duration>) {
        self.read_timeout = t.filter(|d| !d.is_zero());
    }

    /// Set the write deadline. `None` or a zero duration means writes do
    /// not time out.
    ///
    /// A write that hits the deadline corrupts the stream state, so
    /// [`QSocket::write`] closes the handle before returning the error.
    pub fn set_write_deadline(&mut self, t: Option<Duration>) {
        self.write_timeout = t.filter(|d| !d.is_zero());
    }

    /// Whether this handle was configured as the client role.
    pub fn is_client(&self) -> bool {
        self.peer_role == PeerRole::Client
    }

    /// Whether this handle was configured as the server role.
    pub fn is_server(&self) -> bool {
        !self.is_client()
    }

    /// Whether every layer slot is empty.
    pub fn is_closed(&self) -> bool {
        self.layer.is_none()
    }

    /// Whether the underlay carries a TLS session.
    pub fn is_tls(&self) -> bool {
        self.layer
            .as_ref()
            .map(|l| l.transport().is_tls())
            .unwrap_or(false)
    }

    /// Whether the outermost layer is the end-to-end encrypted one.
    pub fn is_e2e(&self) -> bool {
        matches!(self.layer, Some(Layer::Encrypted(_)))
    }

    /// Local address of the underlying connection, if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.layer
            .as_ref()
            .and_then(|l| l.transport().local_addr().ok())
    }

    /// Remote address of the underlying connection, if open.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.layer
            .as_ref()
            .and_then(|l| l.transport().peer_addr().ok())
    }

    /// Forward target the relay injected into the knock response, if any.
    pub fn relay_forward(&self) -> Option<&[u8]> {
        self.relay_forward.as_deref()
    }

    /// Dial the gate over plain TCP, knock, and (with E2E enabled) run
    /// the PAKE and mount the encrypted layer directly over TCP.
    pub async fn dial_tcp(&mut self) -> Result<()> {
        self.dial(false).await
    }

    /// Dial the gate over TLS, knock, and (with E2E enabled) run the
    /// PAKE and mount the encrypted layer over the TLS stream.
    pub async fn dial_tls(&mut self) -> Result<()> {
        self.dial(true).await
    }

    async fn dial(&mut self, tls: bool) -> Result<()> {
        self.ensure_closed()?;

        // A pin can only be checked against a TLS peer certificate.
        if self.cert_pin.is_some() && !tls {
            return Err(Error::NoTlsConnection);
        }

        let cfg = DialConfig {
            gate_host: self.gate_host.clone(),
            gate_port: self.gate_port.unwrap_or(if tls {
                QSRN_GATE_TLS_PORT
            } else {
                QSRN_GATE_PORT
            }),
            tls,
            cert_pin: self.cert_pin,
            proxy: self.proxy.clone(),
            tor: self.tor,
            connect_timeout: Duration::from_secs(10),
        };

        // Until the final promotion below the handle stays closed, so any
        // failure releases every opened layer with the transport.
        let mut transport = dial::open(&cfg).await?;

        let request = KnockRequest::new(&self.secret, self.peer_role, &self.gate_host);
        let response = protocol_switch(&mut transport, &request).await?;
        self.relay_forward = response.has_forward.then(|| response.data);

        if self.e2e {
            let key = match self.peer_role {
                PeerRole::Client => pake::client_exchange(&mut transport, &self.secret).await?,
                PeerRole::Server => pake::server_exchange(&mut transport, &self.secret).await?,
            };
            let encrypted = EncryptedStream::new(transport, key.as_bytes())?;
            self.layer = Some(Layer::Encrypted(encrypted));
        } else {
            self.layer = Some(Layer::Transport(transport));
        }

        tracing::info!(
            role = ?self.peer_role,
            tls,
            e2e = self.e2e,
            "QSocket session established"
        );
        Ok(())
    }

    /// Read from the outermost layer.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.read_timeout;
        let layer = self.layer.as_mut().ok_or(Error::UninitializedSocket)?;
        let n = match deadline {
            Some(limit) => timeout(limit, layer.read(buf))
                .await
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??,
            None => layer.read(buf).await?,
        };
        Ok(n)
    }

    /// Write to the outermost layer. The full buffer is delivered and
    /// flushed through every layer beneath.
    ///
    /// A timed-out write leaves the stream framing corrupt, so the handle
    /// closes itself before surfacing the error; `is_closed()` is true
    /// afterwards.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let deadline = self.write_timeout;
        let layer = self.layer.as_mut().ok_or(Error::UninitializedSocket)?;
        let write = async {
            layer.write_all(buf).await?;
            layer.flush().await
        };
        let result = match deadline {
            Some(limit) => timeout(limit, write)
                .await
                .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into())),
            None => write.await,
        };
        match result {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    // An interrupted write desynchronises TLS and E2E
                    // framing; release every layer.
                    self.close().await;
                }
                Err(Error::Network(e))
            }
        }
    }

    /// Serialise this handle's socket-spec fields and send them once.
    ///
    /// Clients call this immediately after the cryptographic setup.
    pub async fn send_socket_specs(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SocketNotConnected);
        }
        let specs = SocketSpecs {
            command: self.command.clone().unwrap_or_default(),
            forward_addr: self.forward_addr.clone().unwrap_or_default(),
            term_size: self.term_size.unwrap_or_default(),
        };
        let wire = specs.encode()?;
        self.write(&wire).await?;
        Ok(())
    }

    /// Receive the counterpart's socket-spec record.
    ///
    /// Servers call this immediately after the cryptographic setup.
    pub async fn recv_socket_specs(&mut self) -> Result<SocketSpecs> {
        if self.is_closed() {
            return Err(Error::SocketNotConnected);
        }
        let mut buf = vec![0u8; MAX_SPECS];
        let n = self.read(&mut buf).await?;
        SocketSpecs::decode(&buf[..n])
    }

    /// Close the connection, outermost layer first. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut layer) = self.layer.take() {
            // Shutdown drains the E2E frame buffer, sends the TLS
            // close_notify where present, then closes the TCP stream.
            let _ = layer.shutdown().await;
        }
    }

    pub(crate) fn take_layer(&mut self) -> Option<Layer> {
        self.layer.take()
    }

    #[cfg(test)]
    pub(crate) fn with_transport(secret: &str, role: PeerRole, transport: Transport) -> Self {
        let mut sock = Self::new(secret);
        sock.peer_role = role;
        sock.layer = Some(Layer::Transport(transport));
        sock
    }
}
