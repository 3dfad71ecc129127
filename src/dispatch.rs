// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request dispatcher: turns one fully-reassembled up-stream application
//! message into a down-stream reply, invoking the detector inline on the
//! reactor thread (no worker-pool redesign, per spec §9).

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use tracing::warn;

use crate::{
    detector::Detector,
    error::{DispatchError, WireError},
    wire::{DetectionTuple, JpegHeader, YoloHeader, message::JPEG_HEADER_LEN},
};

/// Handles one reassembled message; optionally mirrors the last received
/// JPEG payload to a debug-out file (best-effort, never fails the
/// request).
pub struct Dispatcher {
    debug_out: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(debug_out: Option<PathBuf>) -> Self {
        Self { debug_out }
    }

    /// Process one up-stream message. Returns `Ok(None)` when the detector
    /// declined to emit anything, `Err(_)` when the message is malformed or
    /// the detector failed. Per spec §7 the protocol has no negative ack for
    /// data, so callers log and drop on `Err` exactly as they would on
    /// `Ok(None)`; `Some(reply_bytes)` is the only case that produces a
    /// reply, ready to hand to `SessionChannel::send`.
    pub fn handle(
        &self,
        detector: &Detector,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, DispatchError> {
        if message.len() < JPEG_HEADER_LEN {
            return Err(DispatchError::TooShort(message.len()));
        }
        let (header, jpeg_bytes) = JpegHeader::decode(message)?;
        if header.len as usize != jpeg_bytes.len() {
            return Err(DispatchError::Wire(WireError::SizeMismatch {
                declared: header.len as usize,
                remaining: jpeg_bytes.len(),
            }));
        }

        self.write_debug_out(jpeg_bytes);

        // The 16-byte header variant always carries a threshold field, so
        // 0 means the client asked to detect everything, not "use the
        // default" (spec §4.5 step 4's fallback only applies to the
        // 12-byte header variant, which this relay does not use).
        let threshold = header.threshold();

        let t0 = Instant::now();
        let detections = detector.perform(jpeg_bytes, threshold)?;
        let elapsed_ms = t0.elapsed().as_millis() as u32;

        let tuples: Vec<DetectionTuple> = detections
            .iter()
            .map(|d| DetectionTuple {
                class: d.class as u8,
                conf255: (d.conf.clamp(0.0, 1.0) * 255.0).round() as u8,
                x: d.x as i16,
                y: d.y as i16,
                w: d.w as i16,
                h: d.h as i16,
            })
            .collect();
        let packed = DetectionTuple::pack_all(&tuples);

        let reply_header = YoloHeader::new(header.request_id, elapsed_ms, packed.len() as u32);
        let mut reply = Vec::with_capacity(reply_header.encode().len() + packed.len());
        reply.extend_from_slice(&reply_header.encode());
        reply.extend_from_slice(&packed);
        Ok(Some(reply))
    }

    fn write_debug_out(&self, jpeg_bytes: &[u8]) {
        let Some(path) = self.debug_out.as_ref() else {
            return;
        };
        if let Err(e) = write_debug_out_file(path, jpeg_bytes) {
            warn!(path = %path.display(), error = %e, "failed to write debug-out file");
        }
    }
}

fn write_debug_out_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}
