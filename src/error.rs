// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Leaf error types for the wire codec, control channel, dispatcher and
//! detector. These map 1:1 onto the error kinds of the protocol: callers at
//! component boundaries convert them into `anyhow::Result` (connection
//! scope) or simply log-and-drop (datagram scope), per the propagation
//! policy described alongside each component.

use thiserror::Error;

/// Errors raised while decoding the fixed-size wire structures (transport
/// header, application headers, detection tuples).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer too short: need at least {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },

    #[error("bad magic: expected {expected:?}, got {got:?}")]
    BadMagic { expected: [u8; 4], got: [u8; 4] },

    #[error("declared length {declared} does not match remaining {remaining} bytes")]
    SizeMismatch { declared: usize, remaining: usize },
}

/// Errors raised while parsing a control-channel request line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("expected 3 whitespace-separated fields, got {0}")]
    BadFieldCount(usize),

    #[error("unrecognized verb {0:?}")]
    UnknownVerb(String),

    #[error("client UDP port {0:?} is not a valid u16")]
    BadPort(String),
}

/// Errors surfaced by the request dispatcher; all are drop-and-continue per
/// spec (the protocol has no negative-ack for data).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("message shorter than the minimum header size: {0} bytes")]
    TooShort(usize),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// Errors surfaced by a `Detector::perform` call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("decoded image shape {got:?} does not match expected (416, 416)")]
    ImageShape { got: (u32, u32) },

    #[error("inference failed: {0}")]
    Inference(String),
}
