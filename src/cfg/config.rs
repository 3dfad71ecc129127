// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, ensure};

use crate::cfg::cli::{Cli, Mode, resolve_debug_out_path};

/// Validated, ready-to-run server configuration, built from parsed CLI
/// flags rather than a YAML file (unlike the teacher, this protocol has no
/// negotiated operational parameters worth persisting).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub mode: Mode,
    pub model: Option<PathBuf>,
    pub tick: Duration,
    pub debug_out: Option<PathBuf>,
    pub verbosity: u8,
}

impl ServerConfig {
    /// Resolve `--debug-out` to an absolute path and validate invariants
    /// the CLI parser itself cannot express (e.g. `--tick` must be
    /// positive).
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let debug_out = cli.debug_out.as_deref().map(resolve_debug_out_path).transpose()?;

        let mut cfg = Self {
            port: cli.port,
            mode: cli.mode,
            model: cli.model,
            tick: Duration::from_secs_f64(cli.tick),
            debug_out,
            verbosity: cli.verbose,
        };
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants left unchecked by `clap`.
    fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.port != 0, "--port must not be 0");
        ensure!(self.tick > Duration::ZERO, "--tick must be > 0");
        if let Some(model) = &self.model {
            ensure!(model.exists(), "--model path {model:?} does not exist");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::cli::Cli;

    fn base_cli() -> Cli {
        Cli {
            port: 10000,
            mode: Mode::Cpu,
            model: None,
            tick: 0.1,
            debug_out: None,
            verbose: 0,
        }
    }

    #[test]
    fn builds_from_defaults() {
        let cfg = ServerConfig::from_cli(base_cli()).expect("valid defaults");
        assert_eq!(cfg.port, 10000);
        assert_eq!(cfg.tick, Duration::from_millis(100));
        assert!(cfg.debug_out.is_none());
    }

    #[test]
    fn rejects_zero_port() {
        let mut cli = base_cli();
        cli.port = 0;
        assert!(ServerConfig::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_nonpositive_tick() {
        let mut cli = base_cli();
        cli.tick = 0.0;
        assert!(ServerConfig::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_missing_model_path() {
        let mut cli = base_cli();
        cli.model = Some(PathBuf::from("/does/not/exist/model.bin"));
        assert!(ServerConfig::from_cli(cli).is_err());
    }
}
