//! This module handles configuration, command-line parsing, and logging.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Command-line interface parsing.
pub mod cli;
/// Validated runtime configuration, built from parsed CLI flags.
pub mod config;
/// Logger initialization.
pub mod logger;
