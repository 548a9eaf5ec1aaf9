//! Bitcoin P2P message framing and the `version` message.
//!
//! Frame layout: magic (4) | command, NUL padded (12) | payload length LE (4)
//! | checksum (4, first bytes of double SHA-256 of the payload) | payload.

use std::fmt;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProbeError, ProbeResult};

pub const MAINNET_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];
pub const HEADER_LEN: usize = 24;
const COMMAND_LEN: usize = 12;
/// A `version` payload is ~100 bytes; anything near this is not a peer we want.
pub const MAX_PAYLOAD: u32 = 1 << 20;

pub const USER_AGENT: &str = concat!("/nodewatch:", env!("CARGO_PKG_VERSION"), "/");

pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Wrap a payload into a full network frame.
pub fn frame(command: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAINNET_MAGIC);
    let mut name = [0u8; COMMAND_LEN];
    let len = command.len().min(COMMAND_LEN);
    name[..len].copy_from_slice(&command.as_bytes()[..len]);
    out.extend_from_slice(&name);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(payload));
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: String,
    pub length: u32,
    pub checksum: [u8; 4],
}

impl MessageHeader {
    pub fn parse(buf: &[u8; HEADER_LEN]) -> ProbeResult<Self> {
        if buf[..4] != MAINNET_MAGIC {
            return Err(ProbeError::Protocol(format!(
                "bad network magic {}",
                hex::encode(&buf[..4])
            )));
        }
        let name = &buf[4..4 + COMMAND_LEN];
        let end = name.iter().position(|b| *b == 0).unwrap_or(COMMAND_LEN);
        let command = std::str::from_utf8(&name[..end])
            .map_err(|_| ProbeError::Protocol("command is not ASCII".to_string()))?
            .to_string();
        let length = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let checksum = [buf[20], buf[21], buf[22], buf[23]];
        Ok(Self {
            command,
            length,
            checksum,
        })
    }
}

/// Read one complete message, verifying length and checksum.
pub async fn read_message<R>(reader: &mut R) -> ProbeResult<(String, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head).await.map_err(read_error)?;
    let header = MessageHeader::parse(&head)?;
    if header.length > MAX_PAYLOAD {
        return Err(ProbeError::Protocol(format!(
            "{} payload of {} bytes exceeds limit",
            header.command, header.length
        )));
    }

    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await.map_err(read_error)?;
    let actual = checksum(&payload);
    if actual != header.checksum {
        return Err(ProbeError::Protocol(format!(
            "{} checksum mismatch: header {}, payload {}",
            header.command,
            hex::encode(header.checksum),
            hex::encode(actual)
        )));
    }
    Ok((header.command, payload))
}

fn read_error(e: std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProbeError::Protocol("peer closed the connection".to_string())
    } else {
        ProbeError::Connect(e)
    }
}

// ── version ────────────────────────────────────────────────────────

/// Network address as embedded in `version` (no timestamp field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetAddr {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub receiver: NetAddr,
    pub sender: NetAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionMessage {
    /// Our own announcement: no services, no blocks, no relay.
    pub fn outgoing(version: i32, nonce: u64, timestamp: i64) -> Self {
        Self {
            version,
            services: 0,
            timestamp,
            receiver: NetAddr::default(),
            sender: NetAddr::default(),
            nonce,
            user_agent: USER_AGENT.to_string(),
            start_height: 0,
            relay: false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(86 + self.user_agent.len());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        write_addr(&mut out, &self.receiver);
        write_addr(&mut out, &self.sender);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        write_varint(&mut out, self.user_agent.len() as u64);
        out.extend_from_slice(self.user_agent.as_bytes());
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.push(u8::from(self.relay));
        out
    }

    pub fn decode(payload: &[u8]) -> ProbeResult<Self> {
        let mut r = Reader::new(payload);
        let version = i32::from_le_bytes(r.array()?);
        let services = u64::from_le_bytes(r.array()?);
        let timestamp = i64::from_le_bytes(r.array()?);
        let receiver = r.addr()?;
        let sender = r.addr()?;
        let nonce = u64::from_le_bytes(r.array()?);
        let ua_len = r.varint()?;
        let ua_len = usize::try_from(ua_len)
            .ok()
            .filter(|len| *len <= r.remaining())
            .ok_or_else(|| ProbeError::Protocol(format!("user agent length {ua_len} out of range")))?;
        let user_agent = String::from_utf8_lossy(r.take(ua_len)?).into_owned();
        let start_height = i32::from_le_bytes(r.array()?);
        // Peers older than BIP 37 omit the relay flag.
        let relay = r.take(1).map(|b| b[0] != 0).unwrap_or(true);

        Ok(Self {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

impl fmt::Display for VersionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version={} services={} user_agent={:?} start_height={}",
            self.version, self.services, self.user_agent, self.start_height
        )
    }
}

fn write_addr(out: &mut Vec<u8>, addr: &NetAddr) {
    out.extend_from_slice(&addr.services.to_le_bytes());
    out.extend_from_slice(&addr.ip);
    out.extend_from_slice(&addr.port.to_be_bytes());
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> ProbeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProbeError::Protocol(format!(
                "version payload truncated at byte {}",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> ProbeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn addr(&mut self) -> ProbeResult<NetAddr> {
        Ok(NetAddr {
            services: u64::from_le_bytes(self.array()?),
            ip: self.array()?,
            port: u16::from_be_bytes(self.array()?),
        })
    }

    fn varint(&mut self) -> ProbeResult<u64> {
        let [tag] = self.array::<1>()?;
        Ok(match tag {
            0xfd => u64::from(u16::from_le_bytes(self.array()?)),
            0xfe => u64::from(u32::from_le_bytes(self.array()?)),
            0xff => u64::from_le_bytes(self.array()?),
            n => u64::from(n),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_payload() {
        // Well-known checksum of verack.
        assert_eq!(hex::encode(checksum(&[])), "5df6e0e2");
    }

    #[test]
    fn frame_header_layout() {
        let framed = frame("verack", &[]);
        assert_eq!(framed.len(), HEADER_LEN);
        assert_eq!(
            hex::encode(&framed),
            "f9beb4d976657261636b000000000000000000005df6e0e2"
        );
    }

    #[test]
    fn version_decodes_what_peers_send() {
        let mut peer = VersionMessage::outgoing(70015, 42, 1_700_000_000);
        peer.services = 13;
        peer.user_agent = "/Satoshi:0.15.1/".to_string();
        peer.start_height = 500_000;
        peer.relay = true;

        let decoded = VersionMessage::decode(&peer.encode()).unwrap();
        assert_eq!(decoded, peer);
    }

    #[test]
    fn missing_relay_flag_defaults_to_true() {
        let msg = VersionMessage::outgoing(60002, 1, 0);
        let mut payload = msg.encode();
        payload.pop();
        assert!(VersionMessage::decode(&payload).unwrap().relay);
    }

    #[test]
    fn truncated_version_is_a_protocol_error() {
        let payload = VersionMessage::outgoing(70015, 1, 0).encode();
        let err = VersionMessage::decode(&payload[..40]).unwrap_err();
        assert!(matches!(err, ProbeError::Protocol(_)));
    }

    #[test]
    fn oversized_user_agent_is_rejected() {
        let mut payload = VersionMessage::outgoing(70015, 1, 0).encode();
        // Overwrite the user agent length byte (offset 80) with 0xfc.
        payload[80] = 0xfc;
        assert!(VersionMessage::decode(&payload).is_err());
    }

    #[tokio::test]
    async fn read_message_checks_magic_and_checksum() {
        let payload = VersionMessage::outgoing(70015, 7, 0).encode();
        let good = frame("version", &payload);
        let (command, body) = read_message(&mut good.as_slice()).await.unwrap();
        assert_eq!(command, "version");
        assert_eq!(body, payload);

        let mut corrupt = good.clone();
        *corrupt.last_mut().unwrap() ^= 0xff;
        let err = read_message(&mut corrupt.as_slice()).await.unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));

        let mut testnet = good;
        testnet[..4].copy_from_slice(&[0x0b, 0x11, 0x09, 0x07]);
        let err = read_message(&mut testnet.as_slice()).await.unwrap_err();
        assert!(err.to_string().contains("bad network magic"));
    }

    #[tokio::test]
    async fn eof_mid_header_is_reported_as_closed() {
        let err = read_message(&mut &MAINNET_MAGIC[..]).await.unwrap_err();
        assert_eq!(err.to_string(), "protocol error: peer closed the connection");
    }
}
