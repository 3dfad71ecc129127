// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io::{BufRead, BufReader, Write},
    net::{SocketAddr, TcpStream, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use yolorelay_server::{
    detector::Detector,
    dispatch::Dispatcher,
    net::{Reactor, control::ControlListener},
    wire::{
        DetectionTuple, JpegHeader, YoloHeader,
        transport::{DATA_PAYLOAD_TYPE, END_MARKER, TransportHeader},
    },
};

const POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// A running server, bound to loopback on an ephemeral port, driven by the
/// reactor on its own thread. Dropping it requests shutdown and joins the
/// thread, the way the teacher's integration tests tear down a `docker
/// compose` target.
pub struct TestServer {
    pub control_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn spawn() -> Self {
        let mut reactor = Reactor::new(Detector::Dummy, Dispatcher::new(None)).expect("build reactor");
        let token = reactor.allocate_token();
        let listener = ControlListener::bind(
            reactor.registry(),
            token,
            "127.0.0.1:0".parse().expect("valid loopback literal"),
        )
        .expect("bind control listener");
        let control_addr = listener.local_addr().expect("local addr");
        reactor.register(token, Box::new(listener));

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            reactor.run(Duration::from_millis(10), &shutdown_for_thread).expect("reactor run");
        });

        Self {
            control_addr,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One handshaken session: the TCP control connection (kept open, since
/// closing it tears the session down per spec §4.4) plus the client-side
/// UDP socket and the server's session address.
pub struct Session {
    pub tcp: TcpStream,
    pub udp: UdpSocket,
    pub server_addr: SocketAddr,
}

/// Perform the `FEED`/`DETECT` handshake described in spec §8 scenario 1:
/// bind a client UDP socket, send `FEED <port> <name>`, parse the `+OK`
/// reply, and drain the priming datagram.
pub fn handshake(control_addr: SocketAddr) -> Session {
    let udp = UdpSocket::bind("127.0.0.1:0").expect("bind client udp socket");
    udp.set_read_timeout(Some(POLL_TIMEOUT)).expect("set read timeout");
    let client_port = udp.local_addr().expect("local addr").port();

    let tcp = TcpStream::connect(control_addr).expect("connect control channel");
    tcp.try_clone()
        .expect("clone tcp")
        .write_all(format!("FEED {client_port} demo\r\n").as_bytes())
        .expect("write FEED line");

    let mut reader = BufReader::new(tcp.try_clone().expect("clone tcp for reading"));
    let mut line = String::new();
    reader.read_line(&mut line).expect("read +OK response");
    assert!(line.starts_with("+OK "), "unexpected control response: {line:?}");
    let fields: Vec<&str> = line.trim_end().split_whitespace().collect();
    let server_port: u16 = fields[1].parse().expect("server port");
    let server_addr = SocketAddr::new(control_addr.ip(), server_port);

    let mut priming = [0u8; 16];
    let (n, from) = udp.recv_from(&mut priming).expect("priming datagram");
    assert_eq!(from, server_addr);
    assert_eq!(n, 12, "priming datagram must be 12 bytes");

    Session {
        tcp,
        udp,
        server_addr,
    }
}

/// Fragment `message` into `chunk_size`-byte datagrams at `seq_start` and
/// send them to the session's server address, marking the last one with
/// the end-of-message bit.
pub fn send_fragmented(session: &Session, message: &[u8], chunk_size: usize, seq_start: u16) {
    if message.is_empty() {
        send_chunk(session, &[], true, seq_start);
        return;
    }
    let mut offset = 0;
    let mut seq = seq_start;
    while offset < message.len() {
        let end = (offset + chunk_size).min(message.len());
        send_chunk(session, &message[offset..end], end == message.len(), seq);
        offset = end;
        seq = seq.wrapping_add(1);
    }
}

fn send_chunk(session: &Session, chunk: &[u8], is_last: bool, seq: u16) {
    let pt = DATA_PAYLOAD_TYPE | if is_last { END_MARKER } else { 0 };
    let mut datagram = TransportHeader::new(pt, seq).encode().to_vec();
    datagram.extend_from_slice(chunk);
    session.udp.send_to(&datagram, session.server_addr).expect("send datagram");
}

/// Build a single up-stream `JPEG` message (header + raw bytes).
pub fn jpeg_message(request_id: u32, threshold_x100: u32, jpeg_bytes: &[u8]) -> Vec<u8> {
    let header = JpegHeader::new(request_id, threshold_x100, jpeg_bytes.len() as u32);
    let mut out = header.encode().to_vec();
    out.extend_from_slice(jpeg_bytes);
    out
}

/// Receive and reassemble one down-stream reply (may span multiple
/// datagrams), returning the decoded `YoloHeader` and detection tuples.
pub fn recv_reply(session: &Session) -> (YoloHeader, Vec<DetectionTuple>) {
    let mut message = Vec::new();
    loop {
        let mut buf = [0u8; 65536];
        let (n, from) = session.udp.recv_from(&mut buf).expect("recv reply datagram");
        assert_eq!(from, session.server_addr);
        let (header, payload) = TransportHeader::decode(&buf[..n]).expect("decode transport header");
        assert_eq!(header.channel(), 0x60);
        message.extend_from_slice(payload);
        if header.is_end() {
            break;
        }
    }
    let (header, body) = YoloHeader::decode(&message).expect("decode yolo header");
    assert_eq!(header.len as usize, body.len());
    let tuples = DetectionTuple::unpack_all(body).expect("unpack detection tuples");
    (header, tuples)
}
