use pnet::util::MacAddr;

use crate::constants::{MAC_ADDR_LEN, MAGIC_PACKET_LEN, SYNC_STREAM_LEN};
use crate::error::{Error, Result};

/// Parses a colon- or hyphen-delimited hardware address such as `AA:BB:CC:DD:EE:FF`.
///
/// Exactly six octets of one or two hex digits are accepted, and both delimiters
/// may not be mixed within one address. Any malformed token rejects the whole input.
pub fn parse_mac(mac: &str) -> Result<MacAddr> {
    let mac = mac.trim();
    let delimiter = match (mac.contains(':'), mac.contains('-')) {
        (true, false) => ':',
        (false, true) => '-',
        _ => return Err(Error::InvalidMacFormat),
    };

    let mut octets = [0u8; MAC_ADDR_LEN];
    let mut tokens = mac.split(delimiter);
    for octet in octets.iter_mut() {
        let token = tokens.next().ok_or(Error::InvalidMacFormat)?;
        *octet = parse_octet(token)?;
    }
    if tokens.next().is_some() {
        return Err(Error::InvalidMacFormat);
    }

    let [a, b, c, d, e, f] = octets;
    Ok(MacAddr::new(a, b, c, d, e, f))
}

fn parse_octet(token: &str) -> Result<u8> {
    // from_str_radix tolerates a leading sign, so check the digits up front
    if token.is_empty() || token.len() > 2 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidMacFormat);
    }
    u8::from_str_radix(token, 16).map_err(|_| Error::InvalidMacFormat)
}

/// A Wake-on-LAN payload: six `0xFF` bytes followed by the target MAC repeated sixteen times.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct MagicPacket([u8; MAGIC_PACKET_LEN]);

impl MagicPacket {
    /// Builds the payload for a textual MAC address.
    ///
    /// # Errors
    /// Returns [`Error::InvalidMacFormat`] unless the input parses to exactly six octets.
    pub fn build(mac: &str) -> Result<Self> {
        parse_mac(mac).map(Self::from_mac)
    }

    pub fn from_mac(mac: MacAddr) -> Self {
        let MacAddr(a, b, c, d, e, f) = mac;
        let octets = [a, b, c, d, e, f];

        let mut buf = [0xFF; MAGIC_PACKET_LEN];
        for chunk in buf[SYNC_STREAM_LEN..].chunks_exact_mut(MAC_ADDR_LEN) {
            chunk.copy_from_slice(&octets);
        }
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for MagicPacket {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_mac, MagicPacket};
    use crate::{constants::MAGIC_PACKET_LEN, error::Error};
    use pnet::util::MacAddr;

    #[test]
    fn test_packet_layout() {
        let packet = MagicPacket::build("AA:BB:CC:DD:EE:FF").unwrap();
        let bytes = packet.as_bytes();
        assert_eq!(bytes.len(), MAGIC_PACKET_LEN);
        assert_eq!(bytes.len(), 102);
        assert_eq!(&bytes[..6], &[0xFF; 6]);
        for chunk in bytes[6..].chunks(6) {
            assert_eq!(chunk, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }
    }

    #[test]
    fn test_delimiters_and_case() {
        let expected = MacAddr::new(0x01, 0x23, 0x45, 0x67, 0x89, 0xab);
        assert_eq!(parse_mac("01:23:45:67:89:AB").unwrap(), expected);
        assert_eq!(parse_mac("01-23-45-67-89-ab").unwrap(), expected);
        assert_eq!(parse_mac(" 1:23:45:67:89:aB ").unwrap(), expected);
        assert_eq!(
            MagicPacket::build("01-23-45-67-89-ab").unwrap(),
            MagicPacket::from_mac(expected)
        );
    }

    #[test]
    fn test_invalid_mac() {
        let invalid = [
            "",
            "ZZ:ZZ:ZZ:ZZ:ZZ:ZZ",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "AA:BB:CC:DD:EE:FFF",
            "AA:BB:CC:DD::FF",
            "AA:BB:CC:DD:EE:+F",
            "AA:BB-CC:DD:EE:FF",
            "AABBCCDDEEFF",
            "AA:BB:CC:DD:EE:GG",
        ];
        for mac in invalid {
            assert_eq!(MagicPacket::build(mac), Err(Error::InvalidMacFormat), "{mac}");
        }
    }
}
