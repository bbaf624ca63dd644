//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Header Length (words)       |     Flags     |   Reserved    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Window Size          |            Checksum           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 16 bytes.  The payload length is
//! whatever remains of the datagram after the header.

use crate::error::DecodeError;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0010;
    /// Finish: sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 16;

/// Header length expressed in 32-bit words, as carried on the wire.
pub const HEADER_WORDS: u16 = (HEADER_LEN / 4) as u16;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_HLEN: usize = 8;
const OFF_FLAGS: usize = 10;
const OFF_WINDOW: usize = 12;
const OFF_CHECKSUM: usize = 14;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Segment::encode`] converts to big-endian
/// on the wire and [`Segment::decode`] converts back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of the first payload byte (or of the SYN/FIN).
    pub seq: u32,
    /// Next sequence number expected from the peer; valid when ACK is set.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Advertised receive window in bytes.
    pub window: u16,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// A segment without payload, used for SYN, ACK and FIN.
    pub fn control(seq: u32, ack: u32, flags: u8, window: u16) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload: Vec::new(),
        }
    }

    pub fn is_syn(&self) -> bool {
        self.header.flags & flags::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.header.flags & flags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.header.flags & flags::FIN != 0
    }

    /// Sequence space this segment occupies: payload bytes plus one for
    /// each of SYN and FIN.
    pub fn seq_len(&self) -> u32 {
        self.payload.len() as u32 + u32::from(self.is_syn()) + u32::from(self.is_fin())
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The checksum is computed over the whole datagram with the checksum
    /// field zeroed.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_HLEN..OFF_HLEN + 2].copy_from_slice(&HEADER_WORDS.to_be_bytes());
        buf[OFF_FLAGS] = self.header.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the header-length field points outside the datagram, or
    /// - the checksum does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(buf.len()));
        }

        let hlen = read_u16(buf, OFF_HLEN);
        let offset = usize::from(hlen) * 4;
        if offset < HEADER_LEN || offset > buf.len() {
            return Err(DecodeError::BadOffset(hlen));
        }

        let checksum = read_u16(buf, OFF_CHECKSUM);
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        if internet_checksum(&scratch) != checksum {
            return Err(DecodeError::Checksum);
        }

        Ok(Segment {
            header: Header {
                seq: read_u32(buf, OFF_SEQ),
                ack: read_u32(buf, OFF_ACK),
                flags: buf[OFF_FLAGS],
                window: read_u16(buf, OFF_WINDOW),
            },
            payload: buf[offset..].to_vec(),
        })
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  The caller must zero any checksum field within `data`
/// before calling this function.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    // Odd trailing byte is padded with zero on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_segment(seq: u32, ack: u32, flags: u8, window: u16, payload: &[u8]) -> Segment {
        Segment {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn encode_decode_preserves_fields() {
        let seg = make_segment(42, 7, flags::SYN | flags::ACK, 3072, b"hello");
        let decoded = Segment::decode(&seg.encode()).unwrap();
        assert_eq!(decoded, seg);
    }

    #[test]
    fn header_length_field_is_in_words() {
        let bytes = make_segment(0, 0, 0, 0, b"").encode();
        assert_eq!(read_u16(&bytes, OFF_HLEN), 4);
        assert_eq!(bytes.len(), HEADER_LEN);
    }

    #[test]
    fn fields_are_big_endian_on_wire() {
        let bytes = make_segment(0x0102_0304, 0x0506_0708, flags::FIN, 0x0c00, b"").encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[OFF_WINDOW..OFF_WINDOW + 2], &[0x0c, 0x00]);
        assert_eq!(bytes[OFF_FLAGS], flags::FIN);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Segment::decode(&[]), Err(DecodeError::TooShort(0)));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Segment::decode(&[0u8; HEADER_LEN - 1]),
            Err(DecodeError::TooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_rejects_offset_past_end() {
        let mut bytes = make_segment(1, 2, flags::ACK, 10, b"").encode();
        bytes[OFF_HLEN..OFF_HLEN + 2].copy_from_slice(&9u16.to_be_bytes());
        assert_eq!(Segment::decode(&bytes), Err(DecodeError::BadOffset(9)));
    }

    #[test]
    fn decode_corrupt_byte_returns_checksum_error() {
        let mut bytes = make_segment(99, 0, flags::SYN, 1024, b"test").encode();
        bytes[HEADER_LEN] ^= 0xff;
        assert_eq!(Segment::decode(&bytes), Err(DecodeError::Checksum));
    }

    #[test]
    fn odd_length_payload_checksums() {
        let seg = make_segment(5, 6, flags::ACK, 1, b"abc");
        assert_eq!(Segment::decode(&seg.encode()).unwrap().payload, b"abc");
    }

    #[test]
    fn seq_len_counts_control_flags() {
        assert_eq!(Segment::control(0, 0, flags::SYN, 0).seq_len(), 1);
        assert_eq!(Segment::control(0, 0, flags::ACK, 0).seq_len(), 0);
        assert_eq!(make_segment(0, 0, flags::FIN, 0, b"ab").seq_len(), 3);
    }
}
