// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

/// Inference backend named on the command line. Only `Dummy`-vs-`Yolo`
/// construction is actually implemented (§1: inference itself is an
/// external collaborator); `cuda`/`tensorrt` are accepted and recorded for
/// the startup log line, nothing more.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum Mode {
    Cpu,
    Cuda,
    Tensorrt,
}

/// Raw command-line surface, parsed with `clap`'s derive API.
#[derive(Parser, Debug)]
#[command(
    name = "yolorelay-server",
    about = "RTP-shaped UDP relay that streams JPEG frames to a YOLO detector"
)]
pub struct Cli {
    /// TCP port the control channel listens on.
    #[arg(long, default_value_t = 10000)]
    pub port: u16,

    /// Inference backend hint (does not select the in-process detector;
    /// see `--model`).
    #[arg(long, value_enum, default_value_t = Mode::Cpu)]
    pub mode: Mode,

    /// Path to a model file. When absent, the server runs the fixed-output
    /// dummy detector.
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Reactor poll interval, in fractional seconds.
    #[arg(long, default_value_t = 0.1)]
    pub tick: f64,

    /// Overwrite this file with the most recently dispatched JPEG payload
    /// (best-effort debug aid).
    #[arg(long)]
    pub debug_out: Option<PathBuf>,

    /// Raise log verbosity; repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Resolve a possibly-relative path argument to an absolute path. Mirrors
/// the teacher's `resolve_config_path`, except the target file need not
/// already exist (`--debug-out` names a file the server creates), so only
/// the parent directory is canonicalized.
pub fn resolve_debug_out_path(raw: &Path) -> Result<PathBuf> {
    let abs = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        std::env::current_dir().context("cannot get current working dir")?.join(raw)
    };

    let parent = abs.parent().unwrap_or_else(|| Path::new("."));
    let file_name = abs.file_name().context("--debug-out must name a file")?;
    let canon_parent = parent
        .canonicalize()
        .with_context(|| format!("failed to canonicalize debug-out parent {parent:?}"))?;
    Ok(canon_parent.join(file_name))
}
