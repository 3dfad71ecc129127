// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-session UDP channel: reassembles fragmented up-stream application
//! messages, dispatches complete ones, and fragments down-stream replies
//! back out over the same socket.

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use mio::{Interest, Registry, Token, net::UdpSocket};
use socket2::{Domain, Socket, Type};
use tracing::{debug, info, warn};

use crate::{
    net::reactor::{Channel, ReactorContext},
    wire::transport::{DATA_PAYLOAD_TYPE, END_MARKER, TransportHeader},
};

/// Default chunk size for fragmented sends (spec §4.3).
pub const DEFAULT_CHUNK_SIZE: usize = 32768;

/// Default liveness timeout (spec §9: 10s, chosen to tolerate CPU-bound
/// inference).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The 12-byte priming datagram sent once per session, to open NAT/
/// firewall state toward the client.
const PRIMING_DATAGRAM: [u8; 12] = [0x80, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Receiving,
    ReassemblyPoisoned,
    Closed,
}

pub struct SessionChannel {
    socket: UdpSocket,
    token: Token,
    session_id: [u8; 4],
    remote: SocketAddr,
    recv_seqno: u16,
    send_seqno: u16,
    /// `None` when the reassembly buffer is poisoned by a sequence gap.
    reassembly: Option<Vec<u8>>,
    last_activity: Instant,
    timeout: Duration,
    state: SessionState,
    /// Cleared by the control channel that spawned this session once that
    /// TCP connection closes (spec §4.4: best-effort shutdown).
    control_alive: Option<Arc<AtomicBool>>,
}

impl SessionChannel {
    /// Bind an ephemeral UDP socket with address reuse enabled, register it
    /// with the reactor, and send the priming datagram. Mirrors
    /// `examples/original_source/server/server.py`'s handshake: the
    /// server always primes the client's NAT/firewall state immediately.
    pub fn bind_and_prime(
        registry: &Registry,
        token: Token,
        remote: SocketAddr,
        session_id: [u8; 4],
    ) -> io::Result<Self> {
        let domain = if remote.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket2 = Socket::new(domain, Type::DGRAM, None)?;
        socket2.set_reuse_address(true)?;
        socket2.set_nonblocking(true)?;
        let bind_addr: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().expect("valid literal IPv6 wildcard")
        } else {
            "0.0.0.0:0".parse().expect("valid literal IPv4 wildcard")
        };
        socket2.bind(&bind_addr.into())?;

        let mut socket = UdpSocket::from_std(socket2.into());
        registry.register(&mut socket, token, Interest::READABLE)?;

        let mut channel = Self {
            socket,
            token,
            session_id,
            remote,
            // Clients begin their data stream at seq=1 (spec §8 scenarios 2
            // and 3); seq=0 is never sent upstream.
            recv_seqno: 1,
            send_seqno: 0,
            reassembly: Some(Vec::new()),
            last_activity: Instant::now(),
            timeout: DEFAULT_TIMEOUT,
            state: SessionState::Initializing,
            control_alive: None,
        };
        channel.prime()?;
        channel.state = SessionState::Receiving;
        Ok(channel)
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    pub fn session_id_hex(&self) -> String {
        hex::encode(self.session_id)
    }

    /// Link this session to its spawning control connection: once that
    /// connection clears the flag, `alive()` returns false too.
    pub fn set_control_alive(&mut self, flag: Arc<AtomicBool>) {
        self.control_alive = Some(flag);
    }

    fn prime(&mut self) -> io::Result<()> {
        self.socket.send_to(&PRIMING_DATAGRAM, self.remote)?;
        self.send_seqno = self.send_seqno.wrapping_add(1);
        Ok(())
    }

    /// Fragment `payload` into `chunk_size`-byte datagrams, marking the
    /// last one with the end-of-message bit.
    pub fn send(&mut self, payload: &[u8], chunk_size: usize) -> io::Result<()> {
        if payload.is_empty() {
            return self.send_chunk(&[], true);
        }
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + chunk_size).min(payload.len());
            let is_last = end == payload.len();
            self.send_chunk(&payload[offset..end], is_last)?;
            offset = end;
        }
        Ok(())
    }

    fn send_chunk(&mut self, chunk: &[u8], is_last: bool) -> io::Result<()> {
        let pt = DATA_PAYLOAD_TYPE | if is_last { END_MARKER } else { 0 };
        let header = TransportHeader::new(pt, self.send_seqno);
        self.send_seqno = self.send_seqno.wrapping_add(1);

        let mut datagram = Vec::with_capacity(header.encode().len() + chunk.len());
        datagram.extend_from_slice(&header.encode());
        datagram.extend_from_slice(chunk);
        self.socket.send_to(&datagram, self.remote)?;
        Ok(())
    }

    /// Handle one received datagram already known to come from `self.remote`.
    fn handle_datagram(&mut self, buf: &[u8], ctx: &mut ReactorContext<'_>) {
        let Ok((header, payload)) = TransportHeader::decode(buf) else {
            // Datagram smaller than the transport header: dropped silently.
            return;
        };

        if header.seq != self.recv_seqno {
            self.reassembly = None;
            self.state = SessionState::ReassemblyPoisoned;
            info!(
                token = ?self.token,
                expected = self.recv_seqno,
                got = header.seq,
                "sequence gap, poisoning reassembly buffer"
            );
        }

        if header.channel() == 0x60 {
            if let Some(buf) = self.reassembly.as_mut() {
                buf.extend_from_slice(payload);
            }
        }

        if header.is_end() {
            if let Some(message) = self.reassembly.take() {
                self.state = SessionState::Receiving;
                match ctx.dispatcher.handle(ctx.detector, &message) {
                    Ok(Some(reply)) => {
                        if let Err(e) = self.send(&reply, DEFAULT_CHUNK_SIZE) {
                            warn!(token = ?self.token, error = %e, "failed to send reply datagram");
                        }
                    },
                    Ok(None) => {},
                    Err(e) => {
                        // No negative ack for data (spec §7): log and drop.
                        warn!(token = ?self.token, error = %e, "dropping malformed message");
                    },
                }
            }
            self.reassembly = Some(Vec::new());
            if self.state == SessionState::ReassemblyPoisoned {
                self.state = SessionState::Receiving;
            }
        }

        self.recv_seqno = header.seq.wrapping_add(1);
        self.last_activity = Instant::now();
    }
}

impl Channel for SessionChannel {
    fn on_readable(&mut self, ctx: &mut ReactorContext<'_>) {
        let mut buf = [0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if from != self.remote {
                        continue; // not the advertised remote endpoint
                    }
                    let datagram = buf[..n].to_vec();
                    self.handle_datagram(&datagram, ctx);
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(token = ?self.token, error = %e, "session socket error");
                    self.state = SessionState::Closed;
                    break;
                },
            }
        }
    }

    fn alive(&self, now: Instant) -> bool {
        let control_alive = self
            .control_alive
            .as_ref()
            .is_none_or(|flag| flag.load(Ordering::SeqCst));
        control_alive && self.state != SessionState::Closed && now < self.last_activity + self.timeout
    }

    fn close(&mut self, registry: &Registry) {
        debug!(token = ?self.token, "closing session channel");
        let _ = registry.deregister(&mut self.socket);
        self.state = SessionState::Closed;
    }
}
