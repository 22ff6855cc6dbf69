//! Frame builder and parser shared by both endpoints.
//!
//! Layout, all integers little-endian, no padding:
//!
//! ```text
//! bytes 0..24   802.11 data header (frame control, addresses)
//! bytes 24..42  application header: counts[4] u16, types[4] u8,
//!               total_size u16, timestamp u32
//! bytes 42..    class runs in ascending ordinal order
//! ```
//!
//! The builder and parser are parameterized only by the endpoint role, which
//! selects the direction flags; everything else is identical on both sides.

use std::fmt;

use log::warn;

use super::{DataType, BROADCAST_ADDR, MAX_CLASSES, MAX_PACKET_SIZE};

/// 802.11 MAC header length.
pub const MAC_HDR_LEN: usize = 24;

/// Packed application header length.
pub const APP_HDR_LEN: usize = 2 * MAX_CLASSES + MAX_CLASSES + 2 + 4;

const FRAME_TYPE_MASK: u8 = 0x0C;
const FRAME_TYPE_DATA: u8 = 0x08;
const FLAG_TO_DS: u8 = 0x01;
const FLAG_FROM_DS: u8 = 0x02;

/// Which side of the link this endpoint is. Determines the direction flags
/// written into outgoing frames and expected on incoming ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Station,
    AccessPoint,
}

impl EndpointRole {
    /// Direction flags for frames this endpoint transmits.
    fn tx_flags(self) -> u8 {
        match self {
            EndpointRole::Station => FLAG_TO_DS,
            EndpointRole::AccessPoint => FLAG_FROM_DS,
        }
    }

    /// Direction flags this endpoint accepts on receive (frames travelling
    /// toward it).
    fn rx_flags(self) -> u8 {
        match self {
            EndpointRole::Station => FLAG_FROM_DS,
            EndpointRole::AccessPoint => FLAG_TO_DS,
        }
    }
}

/// Link-layer addressing for outgoing frames. A missing BSSID falls back to
/// the broadcast destination.
#[derive(Debug, Clone, Copy)]
pub struct LinkAddresses {
    pub own_mac: [u8; 6],
    pub bssid: Option<[u8; 6]>,
}

/// Application header of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Element count per class run.
    pub counts: [u16; MAX_CLASSES],
    /// Element type per class run.
    pub types: [DataType; MAX_CLASSES],
    /// Total payload bytes following the application header.
    pub total_size: u16,
    /// Sender monotonic milliseconds at emission.
    pub timestamp: u32,
}

impl FrameHeader {
    /// Payload length implied by the counts and types.
    pub fn expected_payload_len(&self) -> usize {
        self.counts
            .iter()
            .zip(self.types.iter())
            .map(|(&c, t)| c as usize * t.width())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    TooShort,
    WrongFrameType,
    NotForUs,
    InvalidTypeTag,
    TotalSizeTooLarge,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TooShort => write!(f, "frame shorter than headers"),
            ParseError::WrongFrameType => write!(f, "not a data frame for this endpoint"),
            ParseError::NotForUs => write!(f, "destination is another station"),
            ParseError::InvalidTypeTag => write!(f, "unknown data type tag"),
            ParseError::TotalSizeTooLarge => write!(f, "total size exceeds packet limit"),
        }
    }
}

/// A successfully parsed frame. `payload` is what actually arrived; when the
/// frame was cut short it is less than `header.total_size` bytes and
/// `truncated` is set.
#[derive(Debug, PartialEq)]
pub struct ParsedFrame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
    pub truncated: bool,
}

/// Assemble one on-air frame: MAC header, application header, payload.
///
/// `payload` must already be the ordinal-ordered concatenation of class runs
/// and match `header.total_size`.
pub fn build_frame(
    role: EndpointRole,
    link: &LinkAddresses,
    header: &FrameHeader,
    payload: &[u8],
) -> Vec<u8> {
    debug_assert_eq!(payload.len(), header.total_size as usize);

    let mut buf = vec![0u8; MAC_HDR_LEN + APP_HDR_LEN + payload.len()];

    buf[0] = FRAME_TYPE_DATA;
    buf[1] = role.tx_flags();
    let dest = link.bssid.unwrap_or(BROADCAST_ADDR);
    buf[4..10].copy_from_slice(&dest);
    buf[10..16].copy_from_slice(&link.own_mac);
    buf[16..22].copy_from_slice(&link.bssid.unwrap_or(BROADCAST_ADDR));

    let mut off = MAC_HDR_LEN;
    for &count in &header.counts {
        buf[off..off + 2].copy_from_slice(&count.to_le_bytes());
        off += 2;
    }
    for &ty in &header.types {
        buf[off] = ty.tag();
        off += 1;
    }
    buf[off..off + 2].copy_from_slice(&header.total_size.to_le_bytes());
    off += 2;
    buf[off..off + 4].copy_from_slice(&header.timestamp.to_le_bytes());
    off += 4;

    buf[off..off + payload.len()].copy_from_slice(payload);
    buf
}

/// Parse and validate one raw frame received by `role` at `own_mac`.
///
/// A `total_size` larger than the bytes actually present is a soft failure:
/// the frame is still reported, with `truncated` set and the payload clipped
/// to what arrived.
pub fn parse_frame<'a>(
    role: EndpointRole,
    own_mac: [u8; 6],
    raw: &'a [u8],
) -> Result<ParsedFrame<'a>, ParseError> {
    if raw.len() < MAC_HDR_LEN + APP_HDR_LEN {
        return Err(ParseError::TooShort);
    }

    if raw[0] & FRAME_TYPE_MASK != FRAME_TYPE_DATA {
        return Err(ParseError::WrongFrameType);
    }
    if raw[1] & (FLAG_TO_DS | FLAG_FROM_DS) != role.rx_flags() {
        return Err(ParseError::WrongFrameType);
    }

    let dest = &raw[4..10];
    if dest != &own_mac[..] && dest != &BROADCAST_ADDR[..] {
        return Err(ParseError::NotForUs);
    }

    let mut off = MAC_HDR_LEN;
    let mut counts = [0u16; MAX_CLASSES];
    for count in counts.iter_mut() {
        *count = u16::from_le_bytes([raw[off], raw[off + 1]]);
        off += 2;
    }
    let mut types = [DataType::Int32; MAX_CLASSES];
    for ty in types.iter_mut() {
        *ty = DataType::from_tag(raw[off]).ok_or(ParseError::InvalidTypeTag)?;
        off += 1;
    }
    let total_size = u16::from_le_bytes([raw[off], raw[off + 1]]);
    off += 2;
    let timestamp = u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
    off += 4;

    if total_size as usize > MAX_PACKET_SIZE {
        return Err(ParseError::TotalSizeTooLarge);
    }

    let header = FrameHeader {
        counts,
        types,
        total_size,
        timestamp,
    };

    let expected = header.expected_payload_len();
    if expected != total_size as usize {
        warn!(
            "frame size mismatch: header says {}, counts imply {}",
            total_size, expected
        );
    }

    let available = raw.len() - off;
    let truncated = available < total_size as usize;
    if truncated {
        warn!(
            "frame payload truncated: header says {} bytes, {} available",
            total_size, available
        );
    }
    let take = (total_size as usize).min(available);

    Ok(ParsedFrame {
        header,
        payload: &raw[off..off + take],
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STA_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    const AP_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

    fn link() -> LinkAddresses {
        LinkAddresses {
            own_mac: STA_MAC,
            bssid: Some(AP_MAC),
        }
    }

    fn sample_header(total: u16) -> FrameHeader {
        FrameHeader {
            counts: [2, 0, 1, 0],
            types: [
                DataType::Int32,
                DataType::Float,
                DataType::Int16,
                DataType::Int32,
            ],
            total_size: total,
            timestamp: 12_345,
        }
    }

    #[test]
    fn round_trip_preserves_header_and_payload() {
        let payload: Vec<u8> = vec![1, 0, 0, 0, 2, 0, 0, 0, 0xAA, 0xBB];
        let header = sample_header(payload.len() as u16);
        let raw = build_frame(EndpointRole::Station, &link(), &header, &payload);

        let parsed = parse_frame(EndpointRole::AccessPoint, AP_MAC, &raw).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.payload, payload.as_slice());
        assert!(!parsed.truncated);
    }

    #[test]
    fn broadcast_destination_is_accepted() {
        let payload = vec![0u8; 10];
        let header = sample_header(10);
        let no_peer = LinkAddresses {
            own_mac: STA_MAC,
            bssid: None,
        };
        let raw = build_frame(EndpointRole::Station, &no_peer, &header, &payload);
        assert!(parse_frame(EndpointRole::AccessPoint, AP_MAC, &raw).is_ok());
    }

    #[test]
    fn rejects_short_frames() {
        let raw = vec![0x08u8; MAC_HDR_LEN + APP_HDR_LEN - 1];
        assert_eq!(
            parse_frame(EndpointRole::AccessPoint, AP_MAC, &raw),
            Err(ParseError::TooShort)
        );
    }

    #[test]
    fn rejects_wrong_direction() {
        let payload = vec![0u8; 10];
        let header = sample_header(10);
        let raw = build_frame(EndpointRole::Station, &link(), &header, &payload);
        // A station must not accept its own uplink direction.
        assert_eq!(
            parse_frame(EndpointRole::Station, AP_MAC, &raw),
            Err(ParseError::WrongFrameType)
        );
    }

    #[test]
    fn rejects_foreign_destination() {
        let payload = vec![0u8; 10];
        let header = sample_header(10);
        let raw = build_frame(EndpointRole::Station, &link(), &header, &payload);
        let other_mac = [0x02, 0, 0, 0, 0, 0x99];
        assert_eq!(
            parse_frame(EndpointRole::AccessPoint, other_mac, &raw),
            Err(ParseError::NotForUs)
        );
    }

    #[test]
    fn rejects_invalid_type_tag() {
        let payload = vec![0u8; 10];
        let header = sample_header(10);
        let mut raw = build_frame(EndpointRole::Station, &link(), &header, &payload);
        raw[MAC_HDR_LEN + 2 * MAX_CLASSES] = 7;
        assert_eq!(
            parse_frame(EndpointRole::AccessPoint, AP_MAC, &raw),
            Err(ParseError::InvalidTypeTag)
        );
    }

    #[test]
    fn rejects_oversized_total() {
        let payload = vec![0u8; 10];
        let header = sample_header(10);
        let mut raw = build_frame(EndpointRole::Station, &link(), &header, &payload);
        let bad = (MAX_PACKET_SIZE as u16 + 1).to_le_bytes();
        let off = MAC_HDR_LEN + 2 * MAX_CLASSES + MAX_CLASSES;
        raw[off..off + 2].copy_from_slice(&bad);
        assert_eq!(
            parse_frame(EndpointRole::AccessPoint, AP_MAC, &raw),
            Err(ParseError::TotalSizeTooLarge)
        );
    }

    #[test]
    fn truncated_payload_is_soft() {
        let payload = vec![0xCDu8; 10];
        let header = sample_header(10);
        let raw = build_frame(EndpointRole::Station, &link(), &header, &payload);
        let parsed = parse_frame(EndpointRole::AccessPoint, AP_MAC, &raw[..raw.len() - 4]).unwrap();
        assert!(parsed.truncated);
        assert_eq!(parsed.payload.len(), 6);
    }
}
