//! The socket-spec record exchanged once after establishment.
//!
//! A client may carry a command line, a forward address, and terminal
//! dimensions for its counterpart. The record is opaque to the transport:
//! it rides the established stream like any other payload, sent once by
//! the client and consumed once by the server.
//!
//! Encoding is a tagged, length-prefixed field sequence
//! (`tag(1) + len(2, BE) + payload`), self-delimiting so a single read
//! recovers exactly one record.

use crate::error::{Error, Result};

/// Field tag for the command string.
const TAG_COMMAND: u8 = 0x01;
/// Field tag for the forward address string.
const TAG_FORWARD_ADDR: u8 = 0x02;
/// Field tag for the fixed-size terminal dimensions.
const TAG_TERM_SIZE: u8 = 0x03;

const FIELD_HEADER_SIZE: usize = 3;
const TERM_SIZE_LEN: usize = 8;

/// Upper bound on an encoded record; the receive path reads this much.
pub const MAX_SPECS: usize = 512;

/// Terminal dimensions carried in a socket-spec record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermSize {
    /// Terminal rows
    pub rows: u16,
    /// Terminal columns
    pub cols: u16,
    /// Terminal width in pixels
    pub xpixels: u16,
    /// Terminal height in pixels
    pub ypixels: u16,
}

/// Per-session properties a client hands to its counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketSpecs {
    /// Command line the counterpart should execute
    pub command: String,
    /// TCP address the counterpart should forward to
    pub forward_addr: String,
    /// Terminal dimensions for interactive sessions
    pub term_size: TermSize,
}

impl SocketSpecs {
    /// Encode the record into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(
            3 * FIELD_HEADER_SIZE + self.command.len() + self.forward_addr.len() + TERM_SIZE_LEN,
        );
        put_field(&mut buf, TAG_COMMAND, self.command.as_bytes());
        put_field(&mut buf, TAG_FORWARD_ADDR, self.forward_addr.as_bytes());

        let ts = &self.term_size;
        let mut dims = [0u8; TERM_SIZE_LEN];
        dims[0..2].copy_from_slice(&ts.rows.to_be_bytes());
        dims[2..4].copy_from_slice(&ts.cols.to_be_bytes());
        dims[4..6].copy_from_slice(&ts.xpixels.to_be_bytes());
        dims[6..8].copy_from_slice(&ts.ypixels.to_be_bytes());
        put_field(&mut buf, TAG_TERM_SIZE, &dims);

        if buf.len() > MAX_SPECS {
            return Err(Error::invalid_message(format!(
                "socket specs of {} bytes exceed the {MAX_SPECS}-byte record",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Decode one record from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut specs = SocketSpecs::default();
        let mut rest = data;
        while !rest.is_empty() {
            if rest.len() < FIELD_HEADER_SIZE {
                return Err(Error::invalid_message("truncated socket-spec field header"));
            }
            let tag = rest[0];
            let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
            rest = &rest[FIELD_HEADER_SIZE..];
            if rest.len() < len {
                return Err(Error::invalid_message(format!(
                    "socket-spec field 0x{tag:02x} truncated: expected {len} bytes, got {}",
                    rest.len()
                )));
            }
            let (payload, tail) = rest.split_at(len);
            match tag {
                TAG_COMMAND => specs.command = decode_string(tag, payload)?,
                TAG_FORWARD_ADDR => specs.forward_addr = decode_string(tag, payload)?,
                TAG_TERM_SIZE => {
                    if len != TERM_SIZE_LEN {
                        return Err(Error::invalid_message(format!(
                            "term size field of {len} bytes"
                        )));
                    }
                    specs.term_size = TermSize {
                        rows: u16::from_be_bytes([payload[0], payload[1]]),
                        cols: u16::from_be_bytes([payload[2], payload[3]]),
                        xpixels: u16::from_be_bytes([payload[4], payload[5]]),
                        ypixels: u16::from_be_bytes([payload[6], payload[7]]),
                    };
                }
                other => {
                    return Err(Error::invalid_message(format!(
                        "unknown socket-spec tag: 0x{other:02x}"
                    )));
                }
            }
            rest = tail;
        }
        Ok(specs)
    }
}

fn put_field(buf: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
}

fn decode_string(tag: u8, payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|_| Error::invalid_message(format!("socket-spec field 0x{tag:02x} is not UTF-8")))
}
