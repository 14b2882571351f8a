//! End-to-end tests: a running daemon over a mock serial transport
//!
//! Each test spins up the full reactor loop in a background thread,
//! talks to it through a real loopback TCP client, and plays the board
//! side by injecting wire frames into the mock transport.
//!
//! Run with: `cargo test --test daemon_loop`

use setu_io::config::{Config, ControlConfig, NetworkConfig, SerialConfig, SlotsConfig};
use setu_io::daemon::Daemon;
use setu_io::link::frame::{crc16, encode_frame, Decoded, FrameDecoder};
use setu_io::transport::MockTransport;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const PROMPT: u8 = b'\\';

struct TestDaemon {
    addr: std::net::SocketAddr,
    mock: MockTransport,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestDaemon {
    fn start(load: &[&str]) -> Self {
        let config = Config {
            serial: SerialConfig {
                port: "mock0".to_string(),
                baud_rate: 115200,
            },
            network: NetworkConfig {
                bind_address: "127.0.0.1:0".to_string(),
            },
            control: ControlConfig {
                prefix: "pc".to_string(),
                max_sessions: 8,
            },
            slots: SlotsConfig {
                load: load.iter().map(|s| s.to_string()).collect(),
            },
        };

        let mock = MockTransport::new();
        let mut daemon = Daemon::with_transport(config, Box::new(mock.clone())).unwrap();
        let addr = daemon.local_addr().unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let r = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            if let Err(e) = daemon.run(&r) {
                eprintln!("daemon exited with error: {}", e);
            }
        });

        Self {
            addr,
            mock,
            running,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> TcpStream {
        let client = TcpStream::connect(self.addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client
    }

    /// Frames the daemon has written to the board side so far
    fn written_frames(&self) -> Vec<Vec<u8>> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for b in self.mock.get_written() {
            if let Decoded::Frame(f) = decoder.feed(b) {
                frames.push(f);
            }
        }
        frames
    }

    /// Wait until a written frame satisfies `pred`
    fn wait_for_frame(&self, pred: impl Fn(&[u8]) -> bool) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(frame) = self.written_frames().into_iter().find(|f| pred(f)) {
                return frame;
            }
            assert!(Instant::now() < deadline, "expected frame never sent");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_exact(client: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    client.read_exact(&mut buf).unwrap();
    buf
}

/// Read until the prompt byte arrives; returns everything before it
fn read_until_prompt(client: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        client.read_exact(&mut byte).unwrap();
        if byte[0] == PROMPT {
            return String::from_utf8_lossy(&out).into_owned();
        }
        out.push(byte[0]);
    }
}

#[test]
fn test_set_reaches_the_wire_and_prompts() {
    let daemon = TestDaemon::start(&["1:out4"]);
    let mut client = daemon.connect();

    client.write_all(b"pcset out4 outval f\n").unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![PROMPT]);

    // the write packet for core 1: correct op, data, and CRC
    let frame = daemon.wait_for_frame(|f| f[1] & 0x0F == 1 && f[0] & 0x0C == 0x08);
    assert_eq!(frame[3], 1); // one data byte
    assert_eq!(frame[4], 0x0F); // the value
    assert_eq!(crc16(&frame), 0);

    // the ack is accepted without complaint
    daemon
        .mock
        .inject_read(&encode_frame(&[0x08, 0x01, 0x00, 0x01, 0x0F]));
}

#[test]
fn test_missing_ack_reports_numbered_error() {
    let daemon = TestDaemon::start(&["1:out4"]);
    let mut client = daemon.connect();

    client.write_all(b"pcset out4 outval 5\n").unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![PROMPT]);

    // no ack is ever injected: the 100 ms watchdog fires and the
    // numbered error arrives on this session
    let text = read_until_prompt(&mut client);
    assert!(text.starts_with("ERROR 101"), "got {:?}", text);
}

#[test]
fn test_broadcast_fan_out_to_two_clients() {
    let daemon = TestDaemon::start(&["1:out4", "2:bb4io"]);
    let mut client_a = daemon.connect();
    let mut client_b = daemon.connect();

    client_a.write_all(b"pccat bb4io buttons\n").unwrap();
    client_b.write_all(b"pccat bb4io buttons\n").unwrap();
    // cat never prompts; give the reactor a moment to bind both
    std::thread::sleep(Duration::from_millis(300));

    daemon
        .mock
        .inject_read(&encode_frame(&[0x84, 0x02, 0x00, 0x01, 0x03, 0x00]));
    assert_eq!(read_exact(&mut client_a, 3), b"03\n");
    assert_eq!(read_exact(&mut client_b, 3), b"03\n");

    // one subscriber leaving does not disturb the other
    drop(client_a);
    std::thread::sleep(Duration::from_millis(100));
    daemon
        .mock
        .inject_read(&encode_frame(&[0x84, 0x02, 0x00, 0x01, 0x07, 0x00]));
    assert_eq!(read_exact(&mut client_b, 3), b"07\n");
}

#[test]
fn test_async_get_round_trip() {
    let daemon = TestDaemon::start(&["3:basys3"]);
    let mut client = daemon.connect();

    client.write_all(b"pcget basys3 switches\n").unwrap();

    // the three-byte read request goes to core 3
    let frame = daemon.wait_for_frame(|f| f[1] & 0x0F == 3 && f[0] & 0x04 == 0x04);
    assert_eq!(frame[3], 3);

    // board answers; the formatted reply and prompt arrive together
    daemon
        .mock
        .inject_read(&encode_frame(&[0x04, 0x03, 0x00, 0x03, 0xAA, 0xBB, 0xCC, 0x00]));
    assert_eq!(read_exact(&mut client, 9), b"aa bbcc\n\\");
}

#[test]
fn test_list_and_error_lines() {
    let daemon = TestDaemon::start(&["1:out4"]);
    let mut client = daemon.connect();

    client.write_all(b"pclist\n").unwrap();
    let text = read_until_prompt(&mut client);
    assert!(text.contains("out4"));
    assert!(text.contains("enumerator"));

    client.write_all(b"pcbogus 1 2\n").unwrap();
    let text = read_until_prompt(&mut client);
    assert!(text.starts_with("ERROR"), "got {:?}", text);
}
