//! Full-duplex splice between two established QSocket handles.
//!
//! Each handle gets one reader task that pulls chunks of up to 1 KiB and
//! hands each off in a freshly allocated buffer, so the reader's scratch
//! space is never aliased by the opposite writer. A coordination loop
//! selects over the two channels and writes every chunk into the other
//! handle. Ordering is preserved per direction; the directions are not
//! coordinated with each other.

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::socket::{Layer, QSocket};

const CHUNK_SIZE: usize = 1024;

/// Feed chunks read from `reader` into a channel.
///
/// Channel closure is the EOF sentinel: the task drops its sender on EOF
/// or on any read error.
fn spawn_reader(mut reader: ReadHalf<Layer>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(1);
    tokio::spawn(async move {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    // Copy out of the scratch buffer before hand-off.
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Pump bytes between `a` and `b` until either side ends.
///
/// A clean EOF from either peer terminates the splice with
/// [`Error::SessionEnd`]; a transport error is surfaced as itself. Both
/// handles are closed on exit regardless of which side terminated.
pub async fn bind_sockets(mut a: QSocket, mut b: QSocket) -> Result<()> {
    let layer_a = a.take_layer().ok_or(Error::UninitializedSocket)?;
    let layer_b = b.take_layer().ok_or(Error::UninitializedSocket)?;

    let (read_a, mut write_a) = tokio::io::split(layer_a);
    let (read_b, mut write_b) = tokio::io::split(layer_b);

    let mut from_a = spawn_reader(read_a);
    let mut from_b = spawn_reader(read_b);

    let result = loop {
        tokio::select! {
            chunk = from_a.recv() => match chunk {
                Some(chunk) => {
                    if let Err(e) = forward(&mut write_b, &chunk).await {
                        break Err(Error::Network(e));
                    }
                }
                None => break Err(Error::SessionEnd),
            },
            chunk = from_b.recv() => match chunk {
                Some(chunk) => {
                    if let Err(e) = forward(&mut write_a, &chunk).await {
                        break Err(Error::Network(e));
                    }
                }
                None => break Err(Error::SessionEnd),
            },
        }
    };

    tracing::debug!("splice terminated, closing both peers");
    let _ = write_a.shutdown().await;
    let _ = write_b.shutdown().await;
    result
}

async fn forward(writer: &mut WriteHalf<Layer>, chunk: &[u8]) -> std::io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}
