//! End-to-end loopback: a real `HostTransport` and a real `Target` talking
//! across an actual duplex byte stream (a loopback TCP socket pair, so both
//! sides get real blocking reads with real timeouts, same as a tty would
//! give them), in direct (no-radio) mode. Exercises the whole tunnel: frame
//! codec, envelope, sequencing/ACKs, and chunking, without mocking any of
//! the layers in between.
//!
//! Requires both the `std` and `target` features.
#![cfg(all(feature = "std", feature = "target"))]

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use xbeeboot_transport::address::Address;
use xbeeboot_transport::host::{HostTransport, HostTransportConfig, SerialPort, SessionMode};
use xbeeboot_transport::target::{Target, Uart, Watchdog};

struct TcpSerialPort(TcpStream);

impl SerialPort for TcpSerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn set_dtr(&mut self, _level: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> io::Result<()> {
        Ok(())
    }
}

struct TcpUart(TcpStream);

impl Uart for TcpUart {
    type Error = io::Error;

    fn read_byte(&mut self) -> Result<u8, Self::Error> {
        let mut byte = [0u8; 1];
        self.0.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.0.write_all(&[byte])
    }
}

struct NullWatchdog {
    arms: u32,
}

impl Watchdog for NullWatchdog {
    fn arm(&mut self) {
        self.arms += 1;
    }
}

/// Opens a loopback TCP connection and returns its two ends, standing in
/// for the two ends of a wire a serial port and a UART would otherwise
/// share. `read_timeout` governs how long each blocking read waits before
/// giving up, so a protocol bug surfaces as a timeout/panic rather than an
/// indefinitely hung test.
fn duplex_pair(read_timeout: Duration) -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).expect("connect loopback client");
    let (server, _) = listener.accept().expect("accept loopback server");
    for stream in [&client, &server] {
        stream.set_nodelay(true).unwrap();
        stream.set_read_timeout(Some(read_timeout)).unwrap();
    }
    (client, server)
}

#[test]
fn direct_mode_stk500_sync_round_trips_end_to_end() {
    let (host_stream, target_stream) = duplex_pair(Duration::from_millis(200));

    let target_thread = thread::spawn(move || {
        let mut target = Target::new(TcpUart(target_stream), NullWatchdog { arms: 0 });

        // STK500v1 `STK_GET_SYNC, CRC_EOP` tunnelled from the host.
        let sync = [target.recv_byte().unwrap(), target.recv_byte().unwrap()];
        assert_eq!(sync, [0x30, 0x20]);

        // `STK_INSYNC, STK_OK` answered back.
        target.send_byte(0x14).unwrap();
        target.send_byte(0x10).unwrap();
        // A reply sitting in the outbound buffer only actually reaches the
        // wire on the *next* read, matching `getch`'s unconditional leading
        // flush. The session ends here, so force that flush by attempting
        // one more read; it is expected to time out once the host has
        // nothing further to send, which is fine — the flush already ran.
        let _ = target.recv_byte();
    });

    let mut host = HostTransport::new(
        TcpSerialPort(host_stream),
        SessionMode::Direct,
        Address::zero(),
        HostTransportConfig::default(),
    );

    host.send(&[0x30, 0x20]).expect("send STK_GET_SYNC");

    let mut reply = [0u8; 2];
    host.recv(&mut reply).expect("recv STK_INSYNC/STK_OK");
    assert_eq!(reply, [0x14, 0x10]);

    host.close().expect("close session");
    target_thread.join().expect("target thread panicked");
}

#[test]
fn send_chunks_a_payload_larger_than_one_application_datagram() {
    use xbeeboot_transport::constants::HOST_MAX_CHUNK;

    let (host_stream, target_stream) = duplex_pair(Duration::from_millis(200));
    let payload: Vec<u8> = (0..HOST_MAX_CHUNK + 20).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let target_thread = thread::spawn(move || {
        let mut target = Target::new(TcpUart(target_stream), NullWatchdog { arms: 0 });
        let mut received = Vec::new();
        for _ in 0..expected.len() {
            received.push(target.recv_byte().unwrap());
        }
        assert_eq!(received, expected);
    });

    let mut host = HostTransport::new(
        TcpSerialPort(host_stream),
        SessionMode::Direct,
        Address::zero(),
        HostTransportConfig::default(),
    );

    host.send(&payload).expect("send multi-chunk payload");
    host.close().expect("close session");
    target_thread.join().expect("target thread panicked");
}
