//! SRP-6a password-authenticated key exchange over the post-knock stream.
//!
//! Both peers derive the SRP identity and password from the shared secret
//! (`MD5(secret)` and `SHA-256(secret)` respectively), so a matching
//! counterpart reproduces the same credentials without the secret ever
//! crossing the wire. The exchange is four messages, each framed as
//! `[u16 BE length][payload]` with payloads capped at 4096 bytes so one
//! read always yields exactly one message.
//!
//! The client speaks first; the peer role picked at configuration time
//! decides which side of the exchange runs.

use md5::Md5;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use srp::client::SrpClient;
use srp::groups::G_4096;
use srp::server::SrpServer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};

/// SRP group strength in bits.
pub const SRP_BITS: usize = 4096;

/// Upper bound on a single exchange message payload.
pub const MAX_MESSAGE: usize = 4096;

/// MD5 output: the SRP identity length.
const IDENTITY_SIZE: usize = 16;

/// Random salt the server mints per session.
const SALT_SIZE: usize = 16;

/// Random private ephemeral length for both sides.
const EPHEMERAL_SIZE: usize = 64;

/// The 32-byte session key derived by the exchange.
///
/// Zeroized on drop; it outlives the exchange only as the AEAD layer key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Raw key bytes. Handle with care: this is secret key material.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn from_slice(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::SrpFailed);
        }
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(key);
        Ok(Self(out))
    }
}

fn srp_identity(secret: &str) -> [u8; IDENTITY_SIZE] {
    Md5::digest(secret.as_bytes()).into()
}

fn srp_password(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

/// Run the client side of the exchange and derive the session key.
pub async fn client_exchange<S>(stream: &mut S, secret: &str) -> Result<SessionKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = srp_identity(secret);
    let pass = srp_password(secret);

    let client = SrpClient::<Sha256>::new(&G_4096);
    let mut a = [0u8; EPHEMERAL_SIZE];
    OsRng.fill_bytes(&mut a);
    let a_pub = client.compute_public_ephemeral(&a);

    // 1. Credentials: identity and public value A.
    let mut creds = Vec::with_capacity(IDENTITY_SIZE + a_pub.len());
    creds.extend_from_slice(&user);
    creds.extend_from_slice(&a_pub);
    send_message(stream, &creds).await?;

    // 2. Server credentials: salt and B.
    let server_creds = recv_message(stream).await?;
    if server_creds.len() <= SALT_SIZE {
        return Err(Error::SrpFailed);
    }
    let (salt, b_pub) = server_creds.split_at(SALT_SIZE);

    let verifier = client
        .process_reply(&a, &user, &pass, salt, b_pub)
        .map_err(|_| Error::SrpFailed)?;

    // 3. Mutual authenticator M1.
    send_message(stream, verifier.proof()).await?;

    // 4. Server proof M2.
    let proof = recv_message(stream).await?;
    verifier.verify_server(&proof).map_err(|_| Error::SrpFailed)?;

    tracing::debug!("SRP client exchange complete");
    SessionKey::from_slice(verifier.key())
}

/// Run the server side of the exchange and derive the session key.
pub async fn server_exchange<S>(stream: &mut S, secret: &str) -> Result<SessionKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = srp_identity(secret);
    let pass = srp_password(secret);

    // The verifier a registration step would have stored, rebuilt from
    // the shared secret.
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let verifier = SrpClient::<Sha256>::new(&G_4096).compute_verifier(&user, &pass, &salt);

    // 1. Client credentials: identity and A.
    let creds = recv_message(stream).await?;
    if creds.len() <= IDENTITY_SIZE {
        return Err(Error::SrpFailed);
    }
    let (peer_identity, a_pub) = creds.split_at(IDENTITY_SIZE);
    if peer_identity != user {
        return Err(Error::SrpFailed);
    }

    let server = SrpServer::<Sha256>::new(&G_4096);
    let mut b = [0u8; EPHEMERAL_SIZE];
    OsRng.fill_bytes(&mut b);
    let b_pub = server.compute_public_ephemeral(&b, &verifier);

    // 2. Server credentials: salt and B.
    let mut server_creds = Vec::with_capacity(SALT_SIZE + b_pub.len());
    server_creds.extend_from_slice(&salt);
    server_creds.extend_from_slice(&b_pub);
    send_message(stream, &server_creds).await?;

    let session = server
        .process_reply(&b, &verifier, a_pub)
        .map_err(|_| Error::SrpFailed)?;

    // 3. Client authenticator M1.
    let m1 = recv_message(stream).await?;
    session.verify_client(&m1).map_err(|_| Error::SrpFailed)?;

    // 4. Proof M2.
    send_message(stream, session.proof()).await?;

    tracing::debug!("SRP server exchange complete");
    SessionKey::from_slice(session.key())
}

async fn send_message<S>(stream: &mut S, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if payload.is_empty() || payload.len() > MAX_MESSAGE {
        return Err(Error::invalid_message(format!(
            "PAKE message of {} bytes",
            payload.len()
        )));
    }
    stream.write_all(&(payload.len() as u16).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn recv_message<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let len = u16::from_be_bytes(header) as usize;
    if len == 0 || len > MAX_MESSAGE {
        return Err(Error::invalid_message(format!("PAKE message of {len} bytes")));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}
