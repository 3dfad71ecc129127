// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Single-threaded, readiness-based multiplexer over one TCP listener and
//! any number of UDP session sockets.
//!
//! Modeled directly on the Python reference's `select.epoll`-based
//! `EventLoop` (`examples/original_source/server/server2.py`): each
//! iteration waits up to `tick` for readiness, dispatches every ready
//! channel, then performs an idle sweep that closes and drops every
//! channel whose `alive()` predicate has gone false. The ordering is
//! load-bearing: a channel that goes non-alive mid-dispatch (e.g. a TCP
//! peer closing) is only swept *after* every other ready channel this
//! iteration has been serviced.

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use mio::{Events, Poll, Registry, Token};
use tracing::{debug, warn};

use crate::{detector::Detector, dispatch::Dispatcher};

/// Anything the reactor can poll and eventually retire. Each concrete
/// implementation owns (and registers/deregisters) its own mio source.
pub trait Channel {
    /// Called once for every readiness notification on this channel's
    /// token. Newly created channels (e.g. a session spun up by a control
    /// channel's `FEED`) are handed back via `ctx.spawn`.
    fn on_readable(&mut self, ctx: &mut ReactorContext<'_>);

    /// Whether this channel should remain registered. Once false, the
    /// reactor calls `close` and drops it at the end of the current
    /// iteration.
    fn alive(&self, now: Instant) -> bool;

    /// Release any OS resources (deregister from the registry, close
    /// sockets). Called at most once, from the idle sweep.
    fn close(&mut self, registry: &Registry);
}

/// Handed to every `Channel::on_readable` call so it can register new
/// channels and reach the shared, read-only collaborators.
pub struct ReactorContext<'a> {
    pub registry: &'a Registry,
    pub detector: &'a Detector,
    pub dispatcher: &'a Dispatcher,
    pub(crate) spawned: Vec<(Token, Box<dyn Channel>)>,
    pub(crate) next_token: &'a mut usize,
}

impl<'a> ReactorContext<'a> {
    /// Allocate a fresh token for a channel the caller is about to create
    /// (it must register its own mio source with this token before
    /// calling `spawn`).
    pub fn allocate_token(&mut self) -> Token {
        let token = Token(*self.next_token);
        *self.next_token += 1;
        token
    }

    /// Hand a freshly constructed, already-registered channel to the
    /// reactor. It becomes visible starting with the *next* iteration's
    /// dispatch (never the one currently in progress).
    pub fn spawn(&mut self, token: Token, channel: Box<dyn Channel>) {
        self.spawned.push((token, channel));
    }
}

pub struct Reactor {
    poll: Poll,
    channels: HashMap<Token, Box<dyn Channel>>,
    next_token: usize,
    detector: Detector,
    dispatcher: Dispatcher,
}

impl Reactor {
    pub fn new(detector: Detector, dispatcher: Dispatcher) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            channels: HashMap::new(),
            next_token: 1,
            detector,
            dispatcher,
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Register a channel whose mio source has already been registered
    /// against `self.registry()` with `token`.
    pub fn register(&mut self, token: Token, channel: Box<dyn Channel>) {
        self.channels.insert(token, channel);
    }

    /// Allocate a token for a channel that will be registered before the
    /// reactor starts (e.g. the listener).
    pub fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Run until `shutdown_requested` is set (e.g. by a signal handler).
    /// Each iteration waits up to `tick` for readiness.
    pub fn run(&mut self, tick: Duration, shutdown_requested: &Arc<AtomicBool>) -> io::Result<()> {
        let mut events = Events::with_capacity(128);

        while !shutdown_requested.load(Ordering::SeqCst) {
            match self.poll.poll(&mut events, Some(tick)) {
                Ok(()) => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let mut spawned = Vec::new();
            for event in events.iter() {
                let token = event.token();
                if let Some(channel) = self.channels.get_mut(&token) {
                    let mut ctx = ReactorContext {
                        registry: self.poll.registry(),
                        detector: &self.detector,
                        dispatcher: &self.dispatcher,
                        spawned: Vec::new(),
                        next_token: &mut self.next_token,
                    };
                    channel.on_readable(&mut ctx);
                    spawned.append(&mut ctx.spawned);
                } else {
                    debug!(?token, "readiness event for unknown token");
                }
            }

            for (token, channel) in spawned {
                self.channels.insert(token, channel);
            }

            self.idle_sweep();
        }
        Ok(())
    }

    /// Remove and close every channel whose `alive()` predicate is false.
    /// Runs once per iteration, after every ready channel has been
    /// dispatched.
    fn idle_sweep(&mut self) {
        let now = Instant::now();
        let dead: Vec<Token> = self
            .channels
            .iter()
            .filter(|(_, ch)| !ch.alive(now))
            .map(|(token, _)| *token)
            .collect();

        for token in dead {
            if let Some(mut channel) = self.channels.remove(&token) {
                channel.close(self.poll.registry());
            }
        }
    }
}

/// Install SIGINT/SIGTERM handlers that set the returned flag, per
/// `signal_hook::flag`'s standard one-shot pattern. `Reactor::run` exits
/// its loop once this flag is observed true.
pub fn install_shutdown_flag() -> io::Result<Arc<AtomicBool>> {
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_requested))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown_requested))?;
    Ok(shutdown_requested)
}
