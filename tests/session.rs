//! End-to-end sessions against a scripted relay on loopback.
//!
//! The relay here does what the QSRN gate does from a client's point of
//! view: answer the knock with an HTTP status line and, on success,
//! splice the two matched connections byte for byte.

use std::net::SocketAddr;
use std::sync::Arc;

use qsocket::knock::{checksum, CHECKSUM_BASE};
use qsocket::{Error, PeerRole, QSocket, TermSize};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SECRET: &str = "SimpleChatExample!!";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn read_knock<S: AsyncReadExt + Unpin>(sock: &mut S) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer hung up mid-knock");
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return buf;
        }
    }
}

fn knock_uri(request: &[u8]) -> String {
    let text = String::from_utf8_lossy(request);
    let line = text.lines().next().expect("empty knock");
    line.strip_prefix("GET /")
        .and_then(|rest| rest.strip_suffix(" HTTP/1.1"))
        .expect("malformed request line")
        .to_string()
}

/// One-connection relay that answers every knock with a fixed verdict.
async fn verdict_relay(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        read_knock(&mut sock).await;
        sock.write_all(response).await.unwrap();
    });
    addr
}

/// Relay that matches the first two knocks and splices their streams.
async fn splicing_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut first, _) = listener.accept().await.unwrap();
        let knock = read_knock(&mut first).await;
        let role = checksum(knock_uri(&knock).as_bytes(), CHECKSUM_BASE);
        assert!(role <= 1, "knock URI does not encode a role byte");
        first
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
            .await
            .unwrap();

        let (mut second, _) = listener.accept().await.unwrap();
        read_knock(&mut second).await;
        second
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
            .await
            .unwrap();

        let _ = tokio::io::copy_bidirectional(&mut first, &mut second).await;
    });
    addr
}

fn handle(role: PeerRole, gate: SocketAddr, e2e: bool) -> QSocket {
    let mut sock = QSocket::new(SECRET);
    sock.set_peer_role(role).unwrap();
    sock.set_e2e(e2e).unwrap();
    sock.set_gate(gate.ip().to_string(), gate.port()).unwrap();
    sock
}

#[tokio::test]
async fn knock_success_leaves_raw_stream() {
    let gate = verdict_relay(b"HTTP/1.1 101 Switching Protocols\r\n\r\n").await;
    let mut sock = handle(PeerRole::Server, gate, false);

    sock.dial_tcp().await.unwrap();
    assert!(!sock.is_closed());
    assert!(!sock.is_tls());
    assert!(!sock.is_e2e());
    assert!(sock.remote_addr().is_some());

    sock.close().await;
    assert!(sock.is_closed());
    sock.close().await;
    assert!(sock.is_closed());
}

#[tokio::test]
async fn knock_no_peer() {
    let gate = verdict_relay(b"HTTP/1.1 404 Not Found\r\n\r\n").await;
    let mut sock = handle(PeerRole::Client, gate, true);

    let err = sock.dial_tcp().await.unwrap_err();
    assert!(matches!(err, Error::PeerNotFound));
    // A failed dial releases everything; the handle is reusable.
    assert!(sock.is_closed());
    sock.set_e2e(false).unwrap();
}

#[tokio::test]
async fn knock_collision() {
    let gate = verdict_relay(b"HTTP/1.1 409 Conflict\r\n\r\n").await;
    let mut sock = handle(PeerRole::Server, gate, true);

    let err = sock.dial_tcp().await.unwrap_err();
    assert!(matches!(err, Error::AddressInUse));
    assert!(sock.is_closed());
}

#[tokio::test]
async fn knock_upgrade_required_carries_message() {
    let gate = verdict_relay(b"HTTP/1.1 426 Upgrade Required\r\n\r\nplease update client").await;
    let mut sock = handle(PeerRole::Client, gate, true);

    match sock.dial_tcp().await.unwrap_err() {
        Error::UpgradeRequired(msg) => assert_eq!(msg, "please update client"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(sock.is_closed());
}

#[tokio::test]
async fn e2e_session_roundtrip_through_relay() {
    init_tracing();
    let gate = splicing_relay().await;

    let mut server = handle(PeerRole::Server, gate, true);
    let mut client = handle(PeerRole::Client, gate, true);
    client.set_command("uname -a").unwrap();
    client
        .set_term_size(TermSize {
            rows: 42,
            cols: 120,
            xpixels: 0,
            ypixels: 0,
        })
        .unwrap();

    // The server knocks first and blocks in the PAKE until its
    // counterpart arrives.
    let server_task = tokio::spawn(async move {
        server.dial_tcp().await.unwrap();
        assert!(server.is_e2e());

        let specs = server.recv_socket_specs().await.unwrap();
        assert_eq!(specs.command, "uname -a");
        assert_eq!(specs.term_size.rows, 42);

        // Read exactly the announced payload.
        let mut size = [0u8; 4];
        read_full(&mut server, &mut size).await;
        let mut payload = vec![0u8; u32::from_be_bytes(size) as usize];
        read_full(&mut server, &mut payload).await;

        // Echo a digest back so the client can verify the direction.
        let digest: [u8; 32] = Sha256::digest(&payload).into();
        server.write(&digest).await.unwrap();

        // The counterpart closing ends the session cleanly.
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
        server.close().await;
        payload
    });

    client.dial_tcp().await.unwrap();
    assert!(client.is_e2e());
    client.send_socket_specs().await.unwrap();

    let mut payload = vec![0u8; 10 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);
    client
        .write(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    client.write(&payload).await.unwrap();

    let mut digest = [0u8; 32];
    read_full(&mut client, &mut digest).await;
    assert_eq!(digest, <[u8; 32]>::from(Sha256::digest(&payload)));

    client.close().await;
    assert!(client.is_closed());

    let received = server_task.await.unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn plaintext_session_through_relay() {
    let gate = splicing_relay().await;

    let mut server = handle(PeerRole::Server, gate, false);
    let mut client = handle(PeerRole::Client, gate, false);

    let server_task = tokio::spawn(async move {
        server.dial_tcp().await.unwrap();
        assert!(!server.is_e2e());
        let mut buf = [0u8; 5];
        read_full(&mut server, &mut buf).await;
        assert_eq!(&buf, b"hello");
        server.write(b"world").await.unwrap();
        server.close().await;
    });

    client.dial_tcp().await.unwrap();
    client.write(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    read_full(&mut client, &mut buf).await;
    assert_eq!(&buf, b"world");

    client.close().await;
    server_task.await.unwrap();
}

#[tokio::test]
async fn tls_session_with_pinned_certificate() {
    init_tracing();
    // A TLS-terminating relay with a self-signed certificate.
    let signed = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_der = signed.cert.der().clone();
    let pin = hex::encode(Sha256::digest(cert_der.as_ref()));
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(signed.key_pair.serialize_der());
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gate = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let accept = |acceptor: tokio_rustls::TlsAcceptor, sock: TcpStream| async move {
            let mut tls = acceptor.accept(sock).await.unwrap();
            read_knock(&mut tls).await;
            tls.write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
                .await
                .unwrap();
            tls
        };
        let (first, _) = listener.accept().await.unwrap();
        let mut first = accept(acceptor.clone(), first).await;
        let (second, _) = listener.accept().await.unwrap();
        let mut second = accept(acceptor, second).await;
        let _ = tokio::io::copy_bidirectional(&mut first, &mut second).await;
    });

    let mut server = QSocket::new(SECRET);
    server.set_peer_role(PeerRole::Server).unwrap();
    server.set_gate("localhost", gate.port()).unwrap();
    server.set_cert_fingerprint(&pin).unwrap();

    let mut client = QSocket::new(SECRET);
    client.set_peer_role(PeerRole::Client).unwrap();
    client.set_gate("localhost", gate.port()).unwrap();
    client.set_cert_fingerprint(&pin).unwrap();

    let server_task = tokio::spawn(async move {
        server.dial_tls().await.unwrap();
        assert!(server.is_tls());
        assert!(server.is_e2e());
        let mut buf = [0u8; 19];
        read_full(&mut server, &mut buf).await;
        assert_eq!(&buf, b"over tls and relays");
        server.close().await;
    });

    client.dial_tls().await.unwrap();
    assert!(client.is_tls());
    client.write(b"over tls and relays").await.unwrap();

    server_task.await.unwrap();
    client.close().await;
}

async fn read_full(sock: &mut QSocket, buf: &mut [u8]) {
    let mut filled = 0;
    while filled < buf.len() {
        let n = sock.read(&mut buf[filled..]).await.unwrap();
        assert!(n > 0, "unexpected EOF after {filled} bytes");
        filled += n;
    }
}
