//! Opening the byte stream to the QSRN gate.
//!
//! A dial produces a [`Transport`]: plain TCP, or TLS over TCP with an
//! optional pinned certificate. Either flavour can be routed through a
//! SOCKS5 proxy; when the proxy is the well-known Tor loopback the gate
//! hostname is swapped for the onion address before the CONNECT. Tor mode
//! travels on the dial configuration, never as process-wide state.

mod socks5;
mod tls;

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::QSRN_TOR_GATE;

pub use tls::verify_pin;

/// How to reach the gate.
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Gate hostname (clearnet)
    pub gate_host: String,
    /// Gate port
    pub gate_port: u16,
    /// Perform a TLS client handshake after connecting
    pub tls: bool,
    /// SHA-256 of the expected peer certificate DER encoding
    pub cert_pin: Option<[u8; 32]>,
    /// SOCKS5 proxy endpoint
    pub proxy: Option<String>,
    /// Swap the gate hostname for the onion address (set when the proxy
    /// is the Tor loopback)
    pub tor: bool,
    /// TCP connect timeout
    pub connect_timeout: Duration,
}

impl DialConfig {
    /// Plain-TCP dial configuration for the given gate endpoint.
    pub fn new(gate_host: impl Into<String>, gate_port: u16) -> Self {
        Self {
            gate_host: gate_host.into(),
            gate_port,
            tls: false,
            cert_pin: None,
            proxy: None,
            tor: false,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// The transport underlay of a QSocket connection.
#[derive(Debug)]
pub enum Transport {
    /// Direct or proxied TCP
    Tcp(TcpStream),
    /// TLS over TCP
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Whether the transport carries a TLS session.
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Local socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Tcp(s) => s.local_addr(),
            Transport::Tls(s) => s.get_ref().0.local_addr(),
        }
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Tcp(s) => s.peer_addr(),
            Transport::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Open a transport to the gate according to `cfg`.
pub async fn open(cfg: &DialConfig) -> Result<Transport> {
    let gate_host = if cfg.tor && cfg.proxy.is_some() {
        QSRN_TOR_GATE
    } else {
        cfg.gate_host.as_str()
    };

    let tcp = match &cfg.proxy {
        Some(proxy_addr) => {
            tracing::debug!(proxy = %proxy_addr, gate = %gate_host, "dialing gate via SOCKS5");
            let mut stream = connect_tcp(proxy_addr.as_str(), cfg.connect_timeout).await?;
            socks5::connect(&mut stream, gate_host, cfg.gate_port).await?;
            stream
        }
        None => {
            tracing::debug!(gate = %gate_host, port = cfg.gate_port, "dialing gate");
            connect_tcp((gate_host, cfg.gate_port), cfg.connect_timeout).await?
        }
    };

    if !cfg.tls {
        return Ok(Transport::Tcp(tcp));
    }

    let connector = TlsConnector::from(Arc::new(tls::insecure_client_config()));
    let server_name = ServerName::try_from(gate_host.to_string())
        .map_err(|_| Error::invalid_message(format!("invalid gate hostname: {gate_host}")))?;
    let stream = connector.connect(server_name, tcp).await?;

    if let Some(pin) = &cfg.cert_pin {
        let certs = stream.get_ref().1.peer_certificates().unwrap_or_default();
        tls::verify_pin(certs, pin)?;
        tracing::debug!("gate certificate matched pin");
    }

    Ok(Transport::Tls(Box::new(stream)))
}

async fn connect_tcp<A>(addr: A, limit: Duration) -> Result<TcpStream>
where
    A: tokio::net::ToSocketAddrs,
{
    let stream = timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            Error::Network(io::Error::new(
                io::ErrorKind::TimedOut,
                "gate connect timed out",
            ))
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config_for(addr: SocketAddr) -> DialConfig {
        DialConfig::new(addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_open_plain_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hi").await.unwrap();
        });

        let mut transport = open(&config_for(addr)).await.unwrap();
        assert!(!transport.is_tls());
        assert_eq!(transport.peer_addr().unwrap(), addr);

        let mut buf = [0u8; 2];
        transport.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_open_connection_refused() {
        // Bind-then-drop to get a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = open(&config_for(addr)).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    async fn tls_gate() -> (SocketAddr, [u8; 32]) {
        let signed = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert_der = signed.cert.der().clone();
        let pin: [u8; 32] = Sha256::digest(cert_der.as_ref()).into();
        let key = rustls::pki_types::PrivatePkcs8KeyDer::from(signed.key_pair.serialize_der());

        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key.into())
            .unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(sock).await.unwrap();
            let mut buf = [0u8; 4];
            let _ = tls.read_exact(&mut buf).await;
        });

        (addr, pin)
    }

    #[tokio::test]
    async fn test_open_tls_with_matching_pin() {
        let (addr, pin) = tls_gate().await;
        let mut cfg = DialConfig::new("localhost", addr.port());
        cfg.tls = true;
        cfg.cert_pin = Some(pin);

        let mut transport = open(&cfg).await.unwrap();
        assert!(transport.is_tls());
        transport.write_all(b"ping").await.unwrap();
    }

    #[tokio::test]
    async fn test_open_tls_with_wrong_pin() {
        let (addr, _) = tls_gate().await;
        let mut cfg = DialConfig::new("localhost", addr.port());
        cfg.tls = true;
        cfg.cert_pin = Some([0u8; 32]);

        let err = open(&cfg).await.unwrap_err();
        assert!(matches!(err, Error::UntrustedCert));
    }

    #[tokio::test]
    async fn test_open_tls_without_pin_accepts_any_cert() {
        let (addr, _) = tls_gate().await;
        let mut cfg = DialConfig::new("localhost", addr.port());
        cfg.tls = true;

        let transport = open(&cfg).await.unwrap();
        assert!(transport.is_tls());
    }
}
