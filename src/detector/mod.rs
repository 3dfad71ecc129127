// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The detector capability: a single `perform` operation with two
//! implementations. Neural-network inference and JPEG decoding are
//! external collaborators (explicit Non-goals), so `Detector::Yolo` takes
//! an injected inference closure rather than embedding a model runtime;
//! this keeps the grid-decode/soft-NMS pipeline fully exercisable in tests
//! without depending on an actual ONNX/CUDA/TensorRT backend.

pub mod nms;
pub mod yolo;

use crate::error::DetectError;
use nms::{Candidate, soft_nms};
use yolo::{ANCHORS_2GRID, ANCHORS_3GRID, GridOutput, IMAGE_SIDE, decode_grid};

/// One final detection, in input-image pixel units (matches the wire
/// `DetectionTuple` shape before uint8/i16 narrowing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class: u32,
    pub conf: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Decoded 416x416x3 RGB image, row-major, channel-last, `[0, 255]`.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

pub const EXPECTED_WIDTH: u32 = 416;
pub const EXPECTED_HEIGHT: u32 = 416;

/// Injected collaborator: decode JPEG bytes into a 416x416x3 image.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, jpeg_bytes: &[u8]) -> Result<Image, DetectError>;
}

/// Injected collaborator: run inference over a normalized image, returning
/// 2 or 3 raw output grids (see `yolo::GridOutput`).
pub trait Inference: Send + Sync {
    fn infer(&self, image: &Image) -> Result<Vec<GridOutput>, DetectError>;
}

/// The two detector variants named by the spec: a fixed-output stand-in
/// for manual testing, and the full grid-decode + soft-NMS pipeline backed
/// by injected decode/inference collaborators.
pub enum Detector {
    Dummy,
    Yolo {
        decoder: Box<dyn ImageDecoder>,
        inference: Box<dyn Inference>,
    },
}

impl Detector {
    /// Run detection over raw JPEG bytes at the given confidence
    /// threshold, returning detections in pixel units.
    pub fn perform(
        &self,
        jpeg_bytes: &[u8],
        threshold: f32,
    ) -> Result<Vec<Detection>, DetectError> {
        match self {
            Detector::Dummy => Ok(dummy_detection(jpeg_bytes)),
            Detector::Yolo { decoder, inference } => {
                yolo_perform(decoder.as_ref(), inference.as_ref(), jpeg_bytes, threshold)
            },
        }
    }
}

/// Fixed single box, per spec §8 scenario 2: class 16, conf 1.0, box at
/// (131, 131, 104, 104) in pixel units. Input is ignored by design.
fn dummy_detection(_jpeg_bytes: &[u8]) -> Vec<Detection> {
    vec![Detection {
        class: 16,
        conf: 1.0,
        x: 131.0,
        y: 131.0,
        w: 104.0,
        h: 104.0,
    }]
}

fn yolo_perform(
    decoder: &dyn ImageDecoder,
    inference: &dyn Inference,
    jpeg_bytes: &[u8],
    threshold: f32,
) -> Result<Vec<Detection>, DetectError> {
    let image = decoder.decode(jpeg_bytes)?;
    if image.width != EXPECTED_WIDTH || image.height != EXPECTED_HEIGHT {
        return Err(DetectError::ImageShape {
            got: (image.width, image.height),
        });
    }

    let grids = inference.infer(&image)?;
    let candidates = decode_all_grids(&grids, threshold)?;
    let kept = soft_nms(candidates, threshold);

    Ok(kept
        .into_iter()
        .map(|c: Candidate| Detection {
            class: c.class,
            conf: c.conf,
            x: c.x * IMAGE_SIDE,
            y: c.y * IMAGE_SIDE,
            w: c.w * IMAGE_SIDE,
            h: c.h * IMAGE_SIDE,
        })
        .collect())
}

fn decode_all_grids(
    grids: &[GridOutput],
    threshold: f32,
) -> Result<Vec<Candidate>, DetectError> {
    let anchors: &[[(f32, f32); 3]] = match grids.len() {
        3 => &ANCHORS_3GRID,
        2 => &ANCHORS_2GRID,
        n => {
            return Err(DetectError::Inference(format!(
                "expected 2 or 3 output grids, got {n}"
            )));
        },
    };

    let mut out = Vec::new();
    for (grid, anchor_triple) in grids.iter().zip(anchors) {
        out.extend(decode_grid(grid, anchor_triple, threshold));
    }
    Ok(out)
}
