// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pack/unpack of the wire structures: the RTP-shaped transport header, the
//! JPEG/YOLO application message headers, and packed detection tuples.
//! Every struct here is `repr(C)` and zero-copy over a big-endian byte
//! buffer; none of it allocates.

pub mod message;
pub mod transport;

pub use message::{DetectionTuple, JpegHeader, YoloHeader};
pub use transport::{DATA_PAYLOAD_TYPE, END_MARKER, TRANSPORT_HEADER_LEN, TransportHeader};
