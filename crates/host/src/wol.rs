//! Wake-on-LAN magic packets.

use std::fmt;
use std::net::UdpSocket;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum WolError {
    #[error("invalid MAC address {input:?}: {reason}")]
    InvalidMac { input: String, reason: String },

    #[error("failed to open UDP socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to send magic packet to {target}: {source}")]
    Send {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

pub type WolResult<T> = std::result::Result<T, WolError>;

/// Discard port, the conventional Wake-on-LAN destination.
pub const WAKE_PORT: u16 = 9;

/// 6 bytes of `0xFF` followed by the station address repeated 16 times.
pub const MAGIC_PACKET_SIZE: usize = 6 + 16 * 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = WolError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` and bare
    /// `AABBCCDDEEFF`, in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| WolError::InvalidMac {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let digits: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-'))
            .collect();
        if digits.len() != 12 {
            return Err(invalid("expected 12 hex digits"));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("non-hex character"));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &digits[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid(&format!("{pair:?} is not a hex byte")))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_SIZE] {
    let mut packet = [0xFF; MAGIC_PACKET_SIZE];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(mac.bytes());
    }
    packet
}

/// Fire-and-forget delivery of a magic packet.  No acknowledgement exists in
/// the protocol, so `Ok` only means the datagram left the socket.
pub trait WakeSender: Send + Sync {
    fn wake(&self, mac: &MacAddress) -> WolResult<()>;
}

/// Sends the packet from an ephemeral broadcast-enabled UDP socket.
#[derive(Debug, Clone)]
pub struct UdpWakeSender {
    target: String,
    port: u16,
}

impl UdpWakeSender {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            port: WAKE_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl WakeSender for UdpWakeSender {
    fn wake(&self, mac: &MacAddress) -> WolResult<()> {
        let packet = magic_packet(mac);
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(WolError::Socket)?;
        socket.set_broadcast(true).map_err(WolError::Socket)?;

        let target = format!("{}:{}", self.target, self.port);
        socket
            .send_to(&packet, target.as_str())
            .map_err(|source| WolError::Send {
                target: target.clone(),
                source,
            })?;
        info!(%mac, %target, "magic packet sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_common_notations() {
        let expected = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        for raw in ["AA:BB:CC:DD:EE:FF", "aa-bb-cc-dd-ee-ff", "aabbccddeeff", " AA:BB:CC:DD:EE:FF "] {
            assert_eq!(raw.parse::<MacAddress>().unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in ["", "AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:FF:00", "GG:HH:II:JJ:KK:LL", "AA:BB:CC:DD:EE:F\u{e9}", "+A:BB:CC:DD:EE:FF"] {
            assert!(raw.parse::<MacAddress>().is_err(), "{raw}");
        }
    }

    #[test]
    fn displays_colon_separated_upper_case() {
        let mac = MacAddress::new([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
        assert_eq!(mac.to_string(), "00:1A:2B:3C:4D:5E");
    }

    #[test]
    fn magic_packet_layout() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let packet = magic_packet(&mac);

        assert_eq!(packet.len(), 102);
        assert!(packet[..6].iter().all(|&b| b == 0xFF));
        for rep in packet[6..].chunks(6) {
            assert_eq!(rep, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }
    }

    #[test]
    fn udp_sender_delivers_packet() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();

        UdpWakeSender::new("127.0.0.1")
            .with_port(port)
            .wake(&mac)
            .unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &magic_packet(&mac)[..]);
    }
}
