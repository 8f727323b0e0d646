//! Authenticated-encryption framing over an inner byte stream.
//!
//! Every write is sealed into one or more frames of
//! `[u16 BE length][12-byte nonce][ciphertext + tag]`. Nonces are random
//! per frame and inbound nonces are not sequence-checked: on a
//! relay-spliced pipe the first speaker is unknown, so replay detection is
//! left to higher-layer message semantics. Decryption failures surface as
//! `InvalidData` I/O errors.
//!
//! Writes are buffered one frame at a time and drained eagerly; callers
//! must flush (or shut down) to guarantee the last frame reaches the wire.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use rand_core::{OsRng, RngCore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::crypto::{AeadCipher, MAX_FRAME, MAX_PLAINTEXT, NONCE_SIZE, TAG_SIZE};
use crate::error::Result;

const HEADER_SIZE: usize = 2;

/// A byte stream wrapped with authenticated-encryption framing.
pub struct EncryptedStream<S> {
    inner: S,
    cipher: AeadCipher,

    // Inbound frame reassembly.
    read_header: [u8; HEADER_SIZE],
    read_header_filled: usize,
    read_body: Vec<u8>,
    read_body_filled: usize,
    plaintext: Vec<u8>,
    plaintext_pos: usize,

    // Outbound frame being drained into `inner`.
    write_buf: Vec<u8>,
    write_pos: usize,
}

impl<S> EncryptedStream<S> {
    /// Wrap `inner` with AES-256-GCM framing keyed by the 32-byte session key.
    pub fn new(inner: S, key: &[u8]) -> Result<Self> {
        Ok(Self {
            inner,
            cipher: AeadCipher::new(key)?,
            read_header: [0u8; HEADER_SIZE],
            read_header_filled: 0,
            read_body: Vec::new(),
            read_body_filled: 0,
            plaintext: Vec::new(),
            plaintext_pos: 0,
            write_buf: Vec::new(),
            write_pos: 0,
        })
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consume the adapter, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn seal_frame(&mut self, chunk: &[u8]) -> io::Result<()> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .seal(&nonce, chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame encryption failed"))?;

        let body_len = NONCE_SIZE + sealed.len();
        self.write_buf.clear();
        self.write_buf.reserve(HEADER_SIZE + body_len);
        self.write_buf
            .extend_from_slice(&(body_len as u16).to_be_bytes());
        self.write_buf.extend_from_slice(&nonce);
        self.write_buf.extend_from_slice(&sealed);
        self.write_pos = 0;
        Ok(())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for EncryptedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            // Serve buffered plaintext first.
            if this.plaintext_pos < this.plaintext.len() {
                let n = buf.remaining().min(this.plaintext.len() - this.plaintext_pos);
                buf.put_slice(&this.plaintext[this.plaintext_pos..this.plaintext_pos + n]);
                this.plaintext_pos += n;
                return Poll::Ready(Ok(()));
            }

            // Frame header.
            while this.read_header_filled < HEADER_SIZE {
                let mut rb = ReadBuf::new(&mut this.read_header[this.read_header_filled..]);
                ready!(Pin::new(&mut this.inner).poll_read(cx, &mut rb))?;
                let n = rb.filled().len();
                if n == 0 {
                    if this.read_header_filled == 0 {
                        // Clean EOF at a frame boundary.
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                }
                this.read_header_filled += n;
            }

            let body_len = u16::from_be_bytes(this.read_header) as usize;
            if body_len < NONCE_SIZE + TAG_SIZE || body_len > MAX_FRAME {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad frame length: {body_len}"),
                )));
            }
            if this.read_body.len() != body_len {
                this.read_body.resize(body_len, 0);
            }

            // Frame body.
            while this.read_body_filled < body_len {
                let mut rb = ReadBuf::new(&mut this.read_body[this.read_body_filled..]);
                ready!(Pin::new(&mut this.inner).poll_read(cx, &mut rb))?;
                let n = rb.filled().len();
                if n == 0 {
                    return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                }
                this.read_body_filled += n;
            }

            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&this.read_body[..NONCE_SIZE]);
            let plaintext = this
                .cipher
                .open(&nonce, &this.read_body[NONCE_SIZE..])
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "frame authentication failed")
                })?;

            this.plaintext = plaintext;
            this.plaintext_pos = 0;
            this.read_header_filled = 0;
            this.read_body_filled = 0;
            // Empty frames loop back around for the next one.
        }
    }
}

impl<S: AsyncWrite + Unpin> EncryptedStream<S> {
    /// Push buffered frame bytes into the inner stream.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.write_pos < self.write_buf.len() {
            let n = ready!(
                Pin::new(&mut self.inner).poll_write(cx, &self.write_buf[self.write_pos..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.write_pos += n;
        }
        self.write_buf.clear();
        self.write_pos = 0;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for EncryptedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // The previous frame must be fully handed off before a new one
        // is sealed.
        ready!(this.poll_drain(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let chunk_len = buf.len().min(MAX_PLAINTEXT);
        this.seal_frame(&buf[..chunk_len])?;

        // Opportunistic drain; if the inner stream is not ready the frame
        // stays buffered until the next write, flush, or shutdown.
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) | Poll::Pending => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
        }

        Poll::Ready(Ok(chunk_len))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
