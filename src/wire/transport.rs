// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The 4-byte RTP-shaped transport header that prefixes every UDP datagram
//! on a session channel:
//!
//! ```text
//!  byte 0   byte 1   bytes 2-3
//! +-------+--------+-----------+
//! | flags |   pt   |  seq (BE) |
//! +-------+--------+-----------+
//! ```
//!
//! `flags` is always the literal `0x80` on the wire (this relay does not
//! use RTP's other header bits). `pt`'s low 7 bits select the content
//! channel (`96` = application data); the high bit marks the last fragment
//! of an application message.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::WireError;

pub const TRANSPORT_HEADER_LEN: usize = 4;

/// Literal value of the `flags` byte on every emitted datagram.
pub const FLAGS_LITERAL: u8 = 0x80;

/// Low-7-bit payload-type value for the (only) content channel.
pub const DATA_PAYLOAD_TYPE: u8 = 0x60;

bitflags! {
    /// High bit of the `pt` byte, the only flag this transport header
    /// carries. Modeled on the teacher's `ScsiCommandRequestFlags` (a
    /// bitflags wrapper over a single PDU flags byte).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct PtFlags: u8 {
        /// Marks the final fragment of an application message.
        const END = 0x80;
    }
}

/// High bit of `pt`, marking the final fragment of an application message.
pub const END_MARKER: u8 = PtFlags::END.bits();

/// Wire-safe, zero-copy view of the 4 header bytes. Multi-byte fields are
/// kept as raw byte arrays here (an in-memory `u16` would be native-endian,
/// not big-endian) and converted explicitly by [`TransportHeader`].
#[repr(C)]
#[derive(Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawTransportHeader {
    flags: u8,
    pt: u8,
    seq: [u8; 2],
}

/// Decoded transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub pt: u8,
    pub seq: u16,
}

impl TransportHeader {
    pub fn new(pt: u8, seq: u16) -> Self {
        Self { pt, seq }
    }

    /// `pt & 0x7f`: the content-channel selector.
    #[inline]
    pub fn channel(&self) -> u8 {
        self.pt & 0x7f
    }

    /// Whether this packet carries the end-of-message marker.
    #[inline]
    pub fn is_end(&self) -> bool {
        PtFlags::from_bits_truncate(self.pt).contains(PtFlags::END)
    }

    pub fn encode(&self) -> [u8; TRANSPORT_HEADER_LEN] {
        let raw = RawTransportHeader {
            flags: FLAGS_LITERAL,
            pt: self.pt,
            seq: self.seq.to_be_bytes(),
        };
        let mut out = [0u8; TRANSPORT_HEADER_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if buf.len() < TRANSPORT_HEADER_LEN {
            return Err(WireError::TooShort {
                need: TRANSPORT_HEADER_LEN,
                have: buf.len(),
            });
        }
        let (head, rest) = buf.split_at(TRANSPORT_HEADER_LEN);
        let raw = RawTransportHeader::ref_from_bytes(head)
            .expect("slice length checked above matches RawTransportHeader size");
        let header = TransportHeader {
            pt: raw.pt,
            seq: u16::from_be_bytes(raw.seq),
        };
        Ok((header, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_headers() {
        for (pt, seq) in [(0x60, 0u16), (0xE0, 1), (0x60, 65535), (0xE0, 32768)] {
            let h = TransportHeader::new(pt, seq);
            let bytes = h.encode();
            assert_eq!(bytes[0], FLAGS_LITERAL);
            let (decoded, rest) = TransportHeader::decode(&bytes).expect("decode");
            assert!(rest.is_empty());
            assert_eq!(decoded, h);
        }
    }

    #[test]
    fn rejects_short_buffers() {
        let err = TransportHeader::decode(&[0x80, 0x60, 0x00]).unwrap_err();
        assert_eq!(err, WireError::TooShort { need: 4, have: 3 });
    }

    #[test]
    fn classifies_channel_and_end_marker() {
        let h = TransportHeader::new(0xE0, 7);
        assert_eq!(h.channel(), 0x60);
        assert!(h.is_end());

        let h = TransportHeader::new(0x60, 7);
        assert_eq!(h.channel(), 0x60);
        assert!(!h.is_end());
    }

    #[test]
    fn decode_leaves_trailing_payload_untouched() {
        let mut buf = TransportHeader::new(0xE0, 3).encode().to_vec();
        buf.extend_from_slice(b"payload");
        let (_h, rest) = TransportHeader::decode(&buf).expect("decode");
        assert_eq!(rest, b"payload");
    }
}
