// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The TCP control channel: a listener that accepts connections, and one
//! line-parsed handler per connection that turns a `FEED`/`DETECT`
//! command into a freshly registered [`SessionChannel`].

use std::{
    io::{self, ErrorKind, Read, Write},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use mio::{Interest, Registry, Token, net::TcpListener, net::TcpStream};
use rand::Rng;
use tracing::{info, warn};

use crate::{
    error::ControlError,
    net::{
        reactor::{Channel, ReactorContext},
        session::SessionChannel,
    },
};

/// Accepts incoming control connections and spawns one [`ControlChannel`]
/// per accepted socket.
pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub fn bind(registry: &Registry, token: Token, addr: SocketAddr) -> io::Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        registry.register(&mut listener, token, Interest::READABLE)?;
        Ok(Self { listener })
    }

    /// The address actually bound, useful when `addr` was a wildcard port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Channel for ControlListener {
    fn on_readable(&mut self, ctx: &mut ReactorContext<'_>) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = ctx.allocate_token();
                    if let Err(e) = ctx.registry.register(&mut stream, token, Interest::READABLE) {
                        warn!(error = %e, "failed to register accepted control connection");
                        continue;
                    }
                    info!(?peer, "accepted control connection");
                    ctx.spawn(token, Box::new(ControlChannel::new(stream, peer)));
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                },
            }
        }
    }

    fn alive(&self, _now: Instant) -> bool {
        // Failure to bind the listener is fatal at startup; once running it
        // never becomes non-alive on its own.
        true
    }

    fn close(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.listener);
    }
}

pub struct ControlChannel {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Vec<u8>,
    alive: bool,
    /// Shared with the session this connection spawned, if any: cleared
    /// when the control connection closes so the session is torn down on
    /// the next idle sweep too (best-effort shutdown, per spec §4.4).
    session_alive: Option<Arc<AtomicBool>>,
}

impl ControlChannel {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buf: Vec::new(),
            alive: true,
            session_alive: None,
        }
    }

    fn respond(&mut self, line: &str) {
        if let Err(e) = self.stream.write_all(line.as_bytes()) {
            warn!(peer = ?self.peer, error = %e, "failed to write control response");
        }
    }

    fn process_line(&mut self, line: &str, ctx: &mut ReactorContext<'_>) {
        match parse_feed(line) {
            Ok((client_port, _path)) => {
                let remote = SocketAddr::new(self.peer.ip(), client_port);
                let session_id = random_session_id();
                let token = ctx.allocate_token();
                match SessionChannel::bind_and_prime(ctx.registry, token, remote, session_id) {
                    Ok(mut session) => {
                        let session_alive = Arc::new(AtomicBool::new(true));
                        session.set_control_alive(Arc::clone(&session_alive));
                        self.session_alive = Some(session_alive);
                        let port = session.local_port().unwrap_or(0);
                        let hex = session.session_id_hex();
                        ctx.spawn(token, Box::new(session));
                        self.respond(&format!("+OK {port} {hex}\r\n"));
                    },
                    Err(e) => {
                        warn!(error = %e, "failed to create session channel");
                        self.respond("!INVALID\r\n");
                    },
                }
            },
            Err(ControlError::UnknownVerb(_)) => self.respond("!UNKNOWN\r\n"),
            Err(_) => self.respond("!INVALID\r\n"),
        }
    }

    fn drain_lines(&mut self, ctx: &mut ReactorContext<'_>) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let trimmed = line_bytes.trim_ascii_end_matching_crlf();
            match std::str::from_utf8(trimmed) {
                Ok(line) => self.process_line(line, ctx),
                Err(_) => {
                    warn!(
                        peer = ?self.peer,
                        error = %ControlError::InvalidUtf8,
                        "dropping unparseable control line"
                    );
                    self.respond("!INVALID\r\n");
                },
            }
        }
    }
}

trait TrimCrLf {
    fn trim_ascii_end_matching_crlf(&self) -> &[u8];
}

impl TrimCrLf for [u8] {
    fn trim_ascii_end_matching_crlf(&self) -> &[u8] {
        let mut end = self.len();
        while end > 0 && (self[end - 1] == b'\n' || self[end - 1] == b'\r') {
            end -= 1;
        }
        &self[..end]
    }
}

fn random_session_id() -> [u8; 4] {
    let mut id = [0u8; 4];
    rand::rng().fill(&mut id);
    id
}

fn parse_feed(line: &str) -> Result<(u16, String), ControlError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() {
        return Err(ControlError::BadFieldCount(0));
    }
    let verb = fields[0].to_ascii_uppercase();
    if verb != "FEED" && verb != "DETECT" {
        return Err(ControlError::UnknownVerb(fields[0].to_string()));
    }
    if fields.len() != 3 {
        return Err(ControlError::BadFieldCount(fields.len()));
    }
    let port: u16 = fields[1]
        .parse()
        .map_err(|_| ControlError::BadPort(fields[1].to_string()))?;
    Ok((port, fields[2].to_string()))
}

impl Channel for ControlChannel {
    fn on_readable(&mut self, ctx: &mut ReactorContext<'_>) {
        let mut tmp = [0u8; 4096];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => {
                    // peer closed; flush a trailing partial line if present
                    if !self.buf.is_empty() {
                        self.buf.push(b'\n');
                        self.drain_lines(ctx);
                    }
                    self.alive = false;
                    break;
                },
                Ok(n) => {
                    self.buf.extend_from_slice(&tmp[..n]);
                    self.drain_lines(ctx);
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(peer = ?self.peer, error = %e, "control socket read error");
                    self.alive = false;
                    break;
                },
            }
        }
    }

    fn alive(&self, _now: Instant) -> bool {
        self.alive
    }

    fn close(&mut self, registry: &Registry) {
        if let Some(flag) = &self.session_alive {
            flag.store(false, Ordering::SeqCst);
        }
        let _ = registry.deregister(&mut self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feed_and_detect_verbs() {
        assert_eq!(parse_feed("FEED 40001 demo").expect("parse"), (40001, "demo".to_string()));
        assert_eq!(parse_feed("DETECT 40001 demo").expect("parse"), (40001, "demo".to_string()));
        assert_eq!(parse_feed("feed 40001 demo").expect("parse"), (40001, "demo".to_string()));
    }

    #[test]
    fn rejects_unknown_verb() {
        assert_eq!(
            parse_feed("PUSH 1 x").unwrap_err(),
            ControlError::UnknownVerb("PUSH".to_string())
        );
    }

    #[test]
    fn rejects_bad_field_count() {
        assert_eq!(
            parse_feed("FEED 40001").unwrap_err(),
            ControlError::BadFieldCount(2)
        );
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert_eq!(
            parse_feed("FEED abc demo").unwrap_err(),
            ControlError::BadPort("abc".to_string())
        );
    }

    #[test]
    fn trims_crlf_and_lf() {
        assert_eq!(b"FEED 1 x\r\n".trim_ascii_end_matching_crlf(), b"FEED 1 x");
        assert_eq!(b"FEED 1 x\n".trim_ascii_end_matching_crlf(), b"FEED 1 x");
    }
}
