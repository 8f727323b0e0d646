//! Client-side SOCKS5 CONNECT negotiation.
//!
//! Speaks just enough of RFC 1928 to obtain a connected byte stream
//! through a proxy: no-auth greeting, CONNECT request with IPv4/IPv6/
//! domain address forms, and the full reply (including the bound address)
//! consumed so no negotiation bytes leak into the tunnelled stream.

use std::net::IpAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Negotiate a CONNECT to `host:port` over an established proxy stream.
///
/// On success the stream carries the target connection from the next byte.
pub async fn connect(stream: &mut TcpStream, host: &str, port: u16) -> Result<()> {
    // Greeting: one method, no authentication.
    stream
        .write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH])
        .await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS_VERSION {
        return Err(Error::proxy(format!(
            "unexpected SOCKS version: 0x{:02x}",
            choice[0]
        )));
    }
    if choice[1] != METHOD_NO_AUTH {
        return Err(Error::proxy("proxy requires authentication"));
    }

    // CONNECT request.
    let mut req = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(Error::proxy("target hostname too long"));
            }
            req.push(ATYP_DOMAIN);
            req.push(host.len() as u8);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;

    // Reply: version, status, reserved, then the bound address.
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION {
        return Err(Error::proxy(format!(
            "unexpected SOCKS version in reply: 0x{:02x}",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(Error::proxy(reply_message(reply[1])));
    }

    // Consume the bound address so the stream starts clean.
    match reply[3] {
        ATYP_IPV4 => {
            let mut rest = [0u8; 4 + 2];
            stream.read_exact(&mut rest).await?;
        }
        ATYP_IPV6 => {
            let mut rest = [0u8; 16 + 2];
            stream.read_exact(&mut rest).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut rest).await?;
        }
        other => {
            return Err(Error::proxy(format!(
                "unknown bound address type: 0x{other:02x}"
            )));
        }
    }

    Ok(())
}

fn reply_message(code: u8) -> String {
    let reason = match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    };
    format!("CONNECT rejected: {reason} (0x{code:02x})")
}
