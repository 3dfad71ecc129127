// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Application-message headers carried inside reassembled transport
//! payloads, and the packed detection tuple format.
//!
//! Per the spec's resolution of the "12 vs 16 byte JPEG header" ambiguity
//! (see `DESIGN.md`), the up-stream header is the 16-byte variant that
//! carries a client-controlled `threshold_x100` field.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::WireError;

pub const JPEG_MAGIC: [u8; 4] = *b"JPEG";
pub const YOLO_MAGIC: [u8; 4] = *b"YOLO";

pub const JPEG_HEADER_LEN: usize = 16;
pub const YOLO_HEADER_LEN: usize = 16;
pub const DETECTION_TUPLE_LEN: usize = 10;

/// Up-stream application header: `"JPEG" | u32 reqid | u32 threshold_x100 |
/// u32 len`, followed by `len` JPEG bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegHeader {
    pub request_id: u32,
    pub threshold_x100: u32,
    pub len: u32,
}

/// Down-stream application header: `"YOLO" | u32 reqid | u32 elapsed_ms |
/// u32 len`, followed by `len` bytes of packed detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YoloHeader {
    pub request_id: u32,
    pub elapsed_ms: u32,
    pub len: u32,
}

#[repr(C)]
#[derive(Clone, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawAppHeader {
    magic: [u8; 4],
    field1: [u8; 4],
    field2: [u8; 4],
    len: [u8; 4],
}

impl JpegHeader {
    pub fn new(request_id: u32, threshold_x100: u32, len: u32) -> Self {
        Self {
            request_id,
            threshold_x100,
            len,
        }
    }

    /// Threshold in `[0, 1]`, as stored on the wire (`threshold_x100 /
    /// 100`).
    pub fn threshold(&self) -> f32 {
        self.threshold_x100 as f32 / 100.0
    }

    pub fn encode(&self) -> [u8; JPEG_HEADER_LEN] {
        let raw = RawAppHeader {
            magic: JPEG_MAGIC,
            field1: self.request_id.to_be_bytes(),
            field2: self.threshold_x100.to_be_bytes(),
            len: self.len.to_be_bytes(),
        };
        let mut out = [0u8; JPEG_HEADER_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if buf.len() < JPEG_HEADER_LEN {
            return Err(WireError::TooShort {
                need: JPEG_HEADER_LEN,
                have: buf.len(),
            });
        }
        let (head, rest) = buf.split_at(JPEG_HEADER_LEN);
        let raw = RawAppHeader::ref_from_bytes(head)
            .expect("slice length checked above matches RawAppHeader size");
        if raw.magic != JPEG_MAGIC {
            return Err(WireError::BadMagic {
                expected: JPEG_MAGIC,
                got: raw.magic,
            });
        }
        let header = JpegHeader {
            request_id: u32::from_be_bytes(raw.field1),
            threshold_x100: u32::from_be_bytes(raw.field2),
            len: u32::from_be_bytes(raw.len),
        };
        Ok((header, rest))
    }
}

impl YoloHeader {
    pub fn new(request_id: u32, elapsed_ms: u32, len: u32) -> Self {
        Self {
            request_id,
            elapsed_ms,
            len,
        }
    }

    pub fn encode(&self) -> [u8; YOLO_HEADER_LEN] {
        let raw = RawAppHeader {
            magic: YOLO_MAGIC,
            field1: self.request_id.to_be_bytes(),
            field2: self.elapsed_ms.to_be_bytes(),
            len: self.len.to_be_bytes(),
        };
        let mut out = [0u8; YOLO_HEADER_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if buf.len() < YOLO_HEADER_LEN {
            return Err(WireError::TooShort {
                need: YOLO_HEADER_LEN,
                have: buf.len(),
            });
        }
        let (head, rest) = buf.split_at(YOLO_HEADER_LEN);
        let raw = RawAppHeader::ref_from_bytes(head)
            .expect("slice length checked above matches RawAppHeader size");
        if raw.magic != YOLO_MAGIC {
            return Err(WireError::BadMagic {
                expected: YOLO_MAGIC,
                got: raw.magic,
            });
        }
        let header = YoloHeader {
            request_id: u32::from_be_bytes(raw.field1),
            elapsed_ms: u32::from_be_bytes(raw.field2),
            len: u32::from_be_bytes(raw.len),
        };
        Ok((header, rest))
    }
}

/// One packed detection: `class(u8) | conf255(u8) | x,y,w,h (i16 BE)`.
#[repr(C)]
#[derive(Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawDetectionTuple {
    class: u8,
    conf: u8,
    x: [u8; 2],
    y: [u8; 2],
    w: [u8; 2],
    h: [u8; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionTuple {
    pub class: u8,
    pub conf255: u8,
    pub x: i16,
    pub y: i16,
    pub w: i16,
    pub h: i16,
}

impl DetectionTuple {
    pub fn encode(&self) -> [u8; DETECTION_TUPLE_LEN] {
        let raw = RawDetectionTuple {
            class: self.class,
            conf: self.conf255,
            x: self.x.to_be_bytes(),
            y: self.y.to_be_bytes(),
            w: self.w.to_be_bytes(),
            h: self.h.to_be_bytes(),
        };
        let mut out = [0u8; DETECTION_TUPLE_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if buf.len() < DETECTION_TUPLE_LEN {
            return Err(WireError::TooShort {
                need: DETECTION_TUPLE_LEN,
                have: buf.len(),
            });
        }
        let (head, rest) = buf.split_at(DETECTION_TUPLE_LEN);
        let raw = RawDetectionTuple::ref_from_bytes(head)
            .expect("slice length checked above matches RawDetectionTuple size");
        let tuple = DetectionTuple {
            class: raw.class,
            conf255: raw.conf,
            x: i16::from_be_bytes(raw.x),
            y: i16::from_be_bytes(raw.y),
            w: i16::from_be_bytes(raw.w),
            h: i16::from_be_bytes(raw.h),
        };
        Ok((tuple, rest))
    }

    /// Pack a full detection list back-to-back.
    pub fn pack_all(tuples: &[DetectionTuple]) -> Vec<u8> {
        let mut out = Vec::with_capacity(tuples.len() * DETECTION_TUPLE_LEN);
        for t in tuples {
            out.extend_from_slice(&t.encode());
        }
        out
    }

    /// Unpack a byte buffer that is an exact multiple of the tuple size.
    pub fn unpack_all(mut buf: &[u8]) -> Result<Vec<DetectionTuple>, WireError> {
        let mut out = Vec::with_capacity(buf.len() / DETECTION_TUPLE_LEN);
        while !buf.is_empty() {
            let (t, rest) = Self::decode(buf)?;
            out.push(t);
            buf = rest;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_header_round_trips() {
        let h = JpegHeader::new(1, 30, 0);
        let bytes = h.encode();
        assert_eq!(&bytes[0..4], b"JPEG");
        let (decoded, rest) = JpegHeader::decode(&bytes).expect("decode");
        assert!(rest.is_empty());
        assert_eq!(decoded, h);
        assert!((decoded.threshold() - 0.30).abs() < 1e-6);
    }

    #[test]
    fn yolo_header_round_trips() {
        let h = YoloHeader::new(1, 12, 10);
        let (decoded, rest) = YoloHeader::decode(&h.encode()).expect("decode");
        assert!(rest.is_empty());
        assert_eq!(decoded, h);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = JpegHeader::new(1, 30, 0).encode();
        bytes[0] = b'X';
        let err = JpegHeader::decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            WireError::BadMagic {
                expected: JPEG_MAGIC,
                got: *b"XPEG",
            }
        );
    }

    #[test]
    fn detection_tuple_round_trips_negative_coordinates() {
        let tuples = vec![
            DetectionTuple {
                class: 16,
                conf255: 255,
                x: 131,
                y: 131,
                w: 104,
                h: 104,
            },
            DetectionTuple {
                class: 1,
                conf255: 0,
                x: -32768,
                y: -1,
                w: 32767,
                h: 0,
            },
        ];
        let packed = DetectionTuple::pack_all(&tuples);
        assert_eq!(packed.len(), tuples.len() * DETECTION_TUPLE_LEN);
        let unpacked = DetectionTuple::unpack_all(&packed).expect("unpack");
        assert_eq!(unpacked, tuples);
    }

    #[test]
    fn scenario_2_reply_matches_literal_bytes() {
        // From spec §8 scenario 2: class 16, conf 255, box (131,131,104,104).
        let t = DetectionTuple {
            class: 16,
            conf255: 255,
            x: 131,
            y: 131,
            w: 104,
            h: 104,
        };
        assert_eq!(
            t.encode(),
            [0x10, 0xFF, 0x00, 0x83, 0x00, 0x83, 0x00, 0x68, 0x00, 0x68]
        );
    }
}
