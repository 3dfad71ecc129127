// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Sigmoid grid decoding of YOLO network output tensors.
//!
//! The network itself is an external collaborator (see `detector::mod`);
//! this module only turns already-computed grid tensors into candidate
//! boxes, exactly the transform the Python reference's `process_yolo`
//! performs.

use super::nms::Candidate;

/// Number of classes the anchor tables and grid layout assume.
pub const NUM_CLASSES: usize = 80;
/// Anchors per grid cell.
pub const ANCHORS_PER_CELL: usize = 3;
/// Input image side length, used both to normalize box sizes and to scale
/// the final result back to pixel units.
pub const IMAGE_SIDE: f32 = 416.0;

/// Anchor `(width, height)` pairs, in pixel units, for the 3-grid case.
pub const ANCHORS_3GRID: [[(f32, f32); ANCHORS_PER_CELL]; 3] = [
    [(116.0, 90.0), (156.0, 198.0), (373.0, 326.0)],
    [(30.0, 61.0), (62.0, 45.0), (59.0, 119.0)],
    [(10.0, 13.0), (16.0, 30.0), (33.0, 23.0)],
];

/// Anchor `(width, height)` pairs, in pixel units, for the 2-grid case.
pub const ANCHORS_2GRID: [[(f32, f32); ANCHORS_PER_CELL]; 2] = [
    [(81.0, 82.0), (135.0, 169.0), (344.0, 319.0)],
    [(10.0, 14.0), (23.0, 27.0), (37.0, 58.0)],
];

/// One network output grid: `rows * cols * ANCHORS_PER_CELL * (5 +
/// NUM_CLASSES)` raw (pre-sigmoid) values, row-major over `(row, col,
/// anchor, channel)`.
#[derive(Debug, Clone)]
pub struct GridOutput {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl GridOutput {
    pub fn channels_per_anchor() -> usize {
        5 + NUM_CLASSES
    }

    fn value(&self, row: usize, col: usize, k: usize, channel: usize) -> f32 {
        let per_anchor = Self::channels_per_anchor();
        let base = (row * self.cols + col) * ANCHORS_PER_CELL * per_anchor
            + k * per_anchor
            + channel;
        self.data[base]
    }
}

#[inline]
fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Decode one grid against its anchor triple, producing candidates whose
/// objectness-times-class confidence is at least `threshold`. Coordinates
/// are normalized to `[0, 1]`; class ids are 1-based (`mi + 1`) per the
/// spec's wire-compatibility decision.
pub fn decode_grid(
    grid: &GridOutput,
    anchors: &[(f32, f32); ANCHORS_PER_CELL],
    threshold: f32,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            for (k, &(ax, ay)) in anchors.iter().enumerate() {
                if let Some(candidate) =
                    decode_cell(grid, row, col, k, ax, ay, threshold)
                {
                    out.push(candidate);
                }
            }
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn decode_cell(
    grid: &GridOutput,
    row: usize,
    col: usize,
    k: usize,
    ax: f32,
    ay: f32,
    threshold: f32,
) -> Option<Candidate> {
    let mut conf = sigmoid(grid.value(row, col, k, 4));
    if conf < threshold {
        return None;
    }

    let cx = (col as f32 + sigmoid(grid.value(row, col, k, 0))) / grid.cols as f32;
    let cy = (row as f32 + sigmoid(grid.value(row, col, k, 1))) / grid.rows as f32;
    let w = ax * grid.value(row, col, k, 2).exp() / IMAGE_SIDE;
    let h = ay * grid.value(row, col, k, 3).exp() / IMAGE_SIDE;

    let (mi, class_logit) = (0..NUM_CLASSES)
        .map(|i| (i, grid.value(row, col, k, 5 + i)))
        .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
    conf *= sigmoid(class_logit);
    if conf < threshold {
        return None;
    }

    Some(Candidate {
        class: mi as u32 + 1,
        conf,
        x: cx - w / 2.0,
        y: cy - h / 2.0,
        w,
        h,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_cell_grid(values: [f32; 85]) -> GridOutput {
        GridOutput {
            rows: 1,
            cols: 1,
            data: values.to_vec(),
        }
    }

    fn grid_with_anchor(anchor_idx: usize, per_anchor: [f32; 85]) -> GridOutput {
        let mut data = vec![0.0f32; ANCHORS_PER_CELL * 85];
        // A very negative objectness logit sigmoids to ~0 for the other
        // anchors, keeping them below any reasonable threshold.
        for chunk in data.chunks_mut(85) {
            chunk[4] = -20.0;
        }
        data[anchor_idx * 85..(anchor_idx + 1) * 85].copy_from_slice(&per_anchor);
        GridOutput {
            rows: 1,
            cols: 1,
            data,
        }
    }

    #[test]
    fn decodes_a_single_confident_cell() {
        let mut values = [0.0f32; 85];
        // objectness logit high -> sigmoid near 1
        values[4] = 10.0;
        // class 5 logit high -> argmax and sigmoid near 1
        values[5 + 5] = 10.0;
        let grid = single_cell_grid(values);
        let anchors = ANCHORS_3GRID[2];
        let candidates = decode_grid(&grid, &anchors, 0.3);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class, 6); // mi=5 -> class 6 (1-based)
        assert!(candidates[0].conf > 0.9);
    }

    #[test]
    fn low_objectness_is_skipped() {
        let mut values = [0.0f32; 85];
        values[4] = -10.0; // sigmoid near 0
        let grid = single_cell_grid(values);
        let candidates = decode_grid(&grid, &ANCHORS_3GRID[0], 0.3);
        assert!(candidates.is_empty());
    }

    #[test]
    fn per_anchor_decoding_is_independent() {
        let mut values = [0.0f32; 85];
        values[4] = 10.0;
        values[5] = 10.0;
        let grid = grid_with_anchor(1, values);
        let candidates = decode_grid(&grid, &ANCHORS_3GRID[0], 0.5);
        assert_eq!(candidates.len(), 1);
    }
}
