// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use yolorelay_server::{
    cfg::{cli::Cli, config::ServerConfig, logger::init_logger},
    detector::{Detector, Image, ImageDecoder, Inference, yolo::GridOutput},
    dispatch::Dispatcher,
    error::DetectError,
    net::{Reactor, control::ControlListener, reactor::install_shutdown_flag},
};

/// Stand-in for the neural-network inference collaborator (explicit
/// Non-goal, spec §1): reports that no model backend is wired into this
/// build rather than silently returning empty detections.
struct UnimplementedInference;

impl Inference for UnimplementedInference {
    fn infer(&self, _image: &Image) -> Result<Vec<GridOutput>, DetectError> {
        Err(DetectError::Inference(
            "--model was given but no inference backend is compiled into this binary".to_string(),
        ))
    }
}

/// Stand-in for the JPEG decoding collaborator (explicit Non-goal, spec
/// §1).
struct UnimplementedDecoder;

impl ImageDecoder for UnimplementedDecoder {
    fn decode(&self, _jpeg_bytes: &[u8]) -> Result<Image, DetectError> {
        Err(DetectError::Inference(
            "--model was given but no JPEG decoder is compiled into this binary".to_string(),
        ))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbose;
    let cfg = match ServerConfig::from_cli(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("yolorelay-server: {e:#}");
            std::process::exit(100);
        },
    };

    init_logger(verbosity)?;
    info!(port = cfg.port, mode = ?cfg.mode, tick = ?cfg.tick, "starting yolorelay-server");

    let detector = match &cfg.model {
        Some(path) => {
            warn!(
                model = ?path,
                mode = ?cfg.mode,
                "--model given; inference/decoding are external collaborators not compiled into this binary"
            );
            Detector::Yolo {
                decoder: Box::new(UnimplementedDecoder),
                inference: Box::new(UnimplementedInference),
            }
        },
        None => Detector::Dummy,
    };
    let dispatcher = Dispatcher::new(cfg.debug_out);

    let mut reactor = Reactor::new(detector, dispatcher).context("failed to create reactor")?;
    let listen_addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener_token = reactor.allocate_token();
    let listener = ControlListener::bind(reactor.registry(), listener_token, listen_addr)
        .with_context(|| format!("failed to bind control listener on {listen_addr}"))?;
    reactor.register(listener_token, Box::new(listener));

    let shutdown_requested = install_shutdown_flag().context("failed to install signal handlers")?;
    reactor.run(cfg.tick, &shutdown_requested).context("reactor loop failed")?;

    info!("shutdown complete");
    Ok(())
}
