// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Initialize a process-global `tracing` subscriber: `RUST_LOG` wins when
/// set, otherwise verbosity is derived from `--verbose`'s repeat count
/// (0 => warn, 1 => info, 2 => debug, 3+ => trace). Simplified relative to
/// the teacher's span-capturing JSON formatter: this service logs flat
/// structured fields, not nested iSCSI PDU spans.
pub fn init_logger(verbosity: u8) -> Result<()> {
    let default_directive = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to install tracing subscriber")
}
