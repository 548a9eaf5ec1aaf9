//! TCP connections to nodes, direct or through a SOCKS5 proxy for onion
//! addresses.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use nodewatch_core::NodeDescriptor;

use crate::error::{ProbeError, ProbeResult};

const SOCKS_VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Opens connections to nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connector {
    socks_proxy: Option<SocketAddr>,
}

impl Connector {
    pub fn new(socks_proxy: Option<SocketAddr>) -> Self {
        Self { socks_proxy }
    }

    /// Clearnet nodes are dialed directly; onion nodes go through the proxy.
    pub async fn connect(&self, node: &NodeDescriptor) -> ProbeResult<TcpStream> {
        if node.is_onion() {
            let proxy = self
                .socks_proxy
                .ok_or_else(|| ProbeError::NoProxy(node.address.clone()))?;
            debug!(address = %node.address, %proxy, "connecting through socks proxy");
            socks5_connect(proxy, &node.address, node.port).await
        } else {
            TcpStream::connect((node.address.as_str(), node.port))
                .await
                .map_err(ProbeError::Connect)
        }
    }
}

/// SOCKS5 CONNECT (RFC 1928) without authentication. The hostname is
/// resolved by the proxy, which is what makes `.onion` work.
pub async fn socks5_connect(proxy: SocketAddr, host: &str, port: u16) -> ProbeResult<TcpStream> {
    let host_len = u8::try_from(host.len())
        .map_err(|_| ProbeError::Socks(format!("hostname too long: {host}")))?;

    let mut stream = TcpStream::connect(proxy).await.map_err(ProbeError::Connect)?;

    stream.write_all(&[SOCKS_VERSION, 1, NO_AUTH]).await.map_err(socks_io)?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(socks_io)?;
    if choice != [SOCKS_VERSION, NO_AUTH] {
        return Err(ProbeError::Socks(format!(
            "proxy refused no-auth method ({:#04x})",
            choice[1]
        )));
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host_len]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.map_err(socks_io)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(socks_io)?;
    if reply[0] != SOCKS_VERSION {
        return Err(ProbeError::Socks(format!("unexpected reply version {}", reply[0])));
    }
    if reply[1] != 0x00 {
        return Err(ProbeError::Socks(reply_message(reply[1]).to_string()));
    }

    // Skip the bound address; we never use it.
    let addr_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(socks_io)?;
            usize::from(len[0])
        }
        other => {
            return Err(ProbeError::Socks(format!("unknown address type {other}")));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await.map_err(socks_io)?;

    Ok(stream)
}

fn socks_io(e: std::io::Error) -> ProbeError {
    ProbeError::Socks(e.to_string())
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS reply",
    }
}
