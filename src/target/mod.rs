//! Bootloader-resident state machine: the target side of the tunnel.
//!
//! [`Target`] owns the single UART the bootloader has, sniffs whether the
//! other end is a directly-attached raw STK500v1 host or an escaped-API
//! framed one on the first byte it ever sees, and from then on exposes
//! `recv_byte`/`send_byte` to whatever speaks STK500v1 against it —
//! mirroring `xbeeboot.c`'s `getch`/`putch`. Everything here runs with
//! interrupts disabled and no background reader (§5): `recv_byte` and
//! `send_byte` block the caller until their UART I/O completes, and the
//! only liveness guarantee on a permanently wedged link is the
//! [`Watchdog`] this module re-arms on every legitimately framed byte.

use crate::address::Address;
use crate::app::AppMessage;
use crate::constants::{api_type, HOST_MAX_CHUNK, STK500_SYNC_BYTE, START_DELIMITER, TARGET_MAX_CHUNK};
use crate::envelope;
use crate::error::TargetError;
use crate::frame::{encode_frame, FrameOutcome, FrameParser};
use crate::seq::Sequence;

/// A single-byte-at-a-time UART, the only I/O primitive the bootloader has
/// (no bulk reads/writes, no buffering beneath this layer).
pub trait Uart {
    type Error;
    fn read_byte(&mut self) -> Result<u8, Self::Error>;
    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error>;
}

/// The bootloader's sole liveness guarantee on a link with interrupts
/// disabled and no background reader: `arm` is called on every
/// legitimately framed byte, never on a detected framing error, so a
/// running application mistaken for a host can still escape via timeout
/// (§5).
pub trait Watchdog {
    fn arm(&mut self);
}

/// Wraps this module's own [`TargetError`] (frame/sequencing/capacity
/// failures) and the caller-supplied [`Uart::Error`] into the one error
/// type `recv_byte`/`send_byte` return.
#[derive(Debug)]
pub enum TargetIoError<E> {
    Uart(E),
    Target(TargetError),
}

impl<E> From<TargetError> for TargetIoError<E> {
    fn from(e: TargetError) -> Self {
        TargetIoError::Target(e)
    }
}

impl<E> From<crate::error::FrameError> for TargetIoError<E> {
    fn from(e: crate::error::FrameError) -> Self {
        TargetIoError::Target(TargetError::from(e))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unknown,
    Uart,
    Frame,
}

/// Forward cursor over a fill-then-drain inbound buffer: one application
/// payload is copied in wholesale by `fill`, then popped one byte at a time
/// by `pop`. Sized to the host's chunk cap ([`HOST_MAX_CHUNK`]), since the
/// host — not this side — decides how large an inbound datagram is.
struct InboundCursor {
    data: heapless::Vec<u8, HOST_MAX_CHUNK>,
    pos: usize,
}

impl InboundCursor {
    fn new() -> Self {
        InboundCursor { data: heapless::Vec::new(), pos: 0 }
    }

    fn fill(&mut self, bytes: &[u8]) -> Result<(), TargetError> {
        self.data.clear();
        self.data.extend_from_slice(bytes).map_err(|_| TargetError::BufferFull)?;
        self.pos = 0;
        Ok(())
    }

    fn pop(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }
}

/// What a single call to [`Target::poll`] settled on before returning.
enum PollOutcome {
    /// The first-byte sniff resolved to raw UART passthrough; `u8` is that
    /// very byte, already consumed and owed to the caller.
    SniffedUart(u8),
    /// A raw byte in an already-established UART session.
    RawByte(u8),
    /// A well-formed, correctly-sequenced data frame was accepted, buffered
    /// into `inbound`, and ACKed.
    DataAccepted,
    /// The ACK `poll` was asked to wait for was observed.
    AckObserved,
}

/// The bootloader-resident tunnel endpoint. Generic over the concrete
/// [`Uart`] and [`Watchdog`] the hosting firmware provides, the same split
/// the host side takes over [`crate::host::SerialPort`].
pub struct Target<U: Uart, W: Watchdog> {
    uart: U,
    watchdog: W,
    mode: Mode,
    parser: FrameParser,
    /// The 10-byte address copied out of the most recently accepted inbound
    /// frame, used as the destination of every outbound transmit request so
    /// replies automatically target whichever host radio last spoke to us.
    peer: Address,
    /// Last correctly accepted host→target application sequence.
    in_seq: Sequence,
    /// Last target→host application sequence actually sent.
    out_seq: Sequence,
    inbound: InboundCursor,
    outbound: heapless::Vec<u8, TARGET_MAX_CHUNK>,
}

impl<U: Uart, W: Watchdog> Target<U, W> {
    pub fn new(uart: U, watchdog: W) -> Self {
        Target {
            uart,
            watchdog,
            mode: Mode::Unknown,
            parser: FrameParser::new(),
            peer: Address::zero(),
            in_seq: Sequence::NONE,
            out_seq: Sequence::NONE,
            inbound: InboundCursor::new(),
            outbound: heapless::Vec::new(),
        }
    }

    fn read_raw(&mut self) -> Result<u8, TargetIoError<U::Error>> {
        self.uart.read_byte().map_err(TargetIoError::Uart)
    }

    fn write_raw(&mut self, byte: u8) -> Result<(), TargetIoError<U::Error>> {
        self.uart.write_byte(byte).map_err(TargetIoError::Uart)
    }

    /// Blocks for the next byte the caller's STK500v1 layer should see:
    /// raw UART passthrough once that mode is established, or the next
    /// byte reassembled out of an accepted framed datagram. Reproduces
    /// `getch`'s unconditional leading flush of whatever reply bytes are
    /// already buffered — a reply only actually reaches the wire on the
    /// *next* read, not the write that queued it.
    pub fn recv_byte(&mut self) -> Result<u8, TargetIoError<U::Error>> {
        self.transmit()?;
        loop {
            if let Some(byte) = self.inbound.pop() {
                return Ok(byte);
            }
            match self.poll(None)? {
                PollOutcome::SniffedUart(byte) | PollOutcome::RawByte(byte) => return Ok(byte),
                PollOutcome::DataAccepted | PollOutcome::AckObserved => continue,
            }
        }
    }

    /// Queues `byte` for the caller's STK500v1 reply stream: written
    /// straight to the UART in raw mode, or accumulated into the outbound
    /// chunk buffer and flushed once it reaches [`TARGET_MAX_CHUNK`] bytes
    /// (the RF payload budget argued for in that constant's own doc
    /// comment — flushed at exactly that boundary, not one byte past it).
    pub fn send_byte(&mut self, byte: u8) -> Result<(), TargetIoError<U::Error>> {
        if self.mode == Mode::Uart {
            self.write_raw(byte)?;
            self.watchdog.arm();
            return Ok(());
        }
        self.outbound.push(byte).map_err(|_| TargetError::BufferFull)?;
        if self.outbound.len() >= TARGET_MAX_CHUNK {
            self.transmit()?;
        }
        Ok(())
    }

    /// Flushes the outbound accumulator as one `FIRMWARE_REPLY` datagram
    /// and blocks until its ACK is observed, retrying nothing explicitly —
    /// like the host's own data-send path, a permanently dead link simply
    /// hangs here rather than giving up (§4.4). A no-op if nothing is
    /// queued (true of UART mode, which never populates `outbound`).
    fn transmit(&mut self) -> Result<(), TargetIoError<U::Error>> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        self.out_seq = self.out_seq.next();
        let seq = self.out_seq;
        let msg = AppMessage::FirmwareReply { seq, payload: self.outbound.as_slice() };
        let mut data = [0u8; TARGET_MAX_CHUNK + 8];
        let data_len = msg.encode(&mut data)?;
        self.write_frame(&data[..data_len])?;
        self.outbound.clear();
        loop {
            match self.poll(Some(seq))? {
                PollOutcome::AckObserved => return Ok(()),
                _ => continue,
            }
        }
    }

    fn send_ack(&mut self, seq: Sequence) -> Result<(), TargetIoError<U::Error>> {
        let msg = AppMessage::Ack { seq };
        let mut data = [0u8; 4];
        let data_len = msg.encode(&mut data)?;
        self.write_frame(&data[..data_len])
    }

    /// Wraps `data` in a transmit-request envelope addressed to the last
    /// learned peer and pushes the escaped frame out one byte at a time —
    /// this side has no bulk UART write, only `Uart::write_byte`. The
    /// envelope sequence byte is always `0`: unlike the host, which tags
    /// every local/remote AT command with a fresh sequence to match its
    /// response, the target never expects a reply to its own transmit
    /// requests and so never increments it, avoiding provoking the local
    /// radio into emitting transmit-status frames it has no budget to
    /// receive.
    fn write_frame(&mut self, data: &[u8]) -> Result<(), TargetIoError<U::Error>> {
        let mut payload = [0u8; crate::constants::MAX_FRAME_SIZE];
        let payload_len = envelope::encode_transmit_request(&mut payload, 0, self.peer, 0, 0, data)?;
        let mut frame = [0u8; crate::constants::MAX_FRAME_SIZE + 8];
        let frame_len = encode_frame(&payload[..payload_len], &mut frame)?;
        for &byte in &frame[..frame_len] {
            self.write_raw(byte)?;
        }
        Ok(())
    }

    /// Reads and reacts to exactly one meaningful event off the UART:
    /// either resolves the still-unknown protocol mode, returns a raw
    /// passthrough byte, accepts/ACKs one framed data datagram, or — when
    /// `wait_for_ack` names a sequence — recognizes its ACK. Anomalous
    /// sequences are tracked with a flip-flop local to this call only
    /// (never persisted across calls): the first is tolerated silently,
    /// a second in a row re-sends an ACK of the last good sequence to
    /// unstick a peer that may have lost ours (§4.4).
    fn poll(&mut self, wait_for_ack: Option<Sequence>) -> Result<PollOutcome, TargetIoError<U::Error>> {
        let mut saw_invalid = false;
        loop {
            match self.mode {
                Mode::Unknown => {
                    let byte = self.read_raw()?;
                    match byte {
                        STK500_SYNC_BYTE => {
                            self.mode = Mode::Uart;
                            self.watchdog.arm();
                            return Ok(PollOutcome::SniffedUart(byte));
                        }
                        START_DELIMITER => {
                            self.mode = Mode::Frame;
                            self.watchdog.arm();
                            let _ = self.parser.push(byte);
                        }
                        api_type::RECEIVE_PACKET => {
                            // The start delimiter was lost in transit; there
                            // is nothing to recover a length/checksum from a
                            // single stray byte, so the parser is left
                            // untouched to resync on the next genuine 0x7E.
                            self.mode = Mode::Frame;
                            self.watchdog.arm();
                        }
                        _ => {}
                    }
                }
                Mode::Uart => {
                    let byte = self.read_raw()?;
                    self.watchdog.arm();
                    return Ok(PollOutcome::RawByte(byte));
                }
                Mode::Frame => {
                    let byte = self.read_raw()?;
                    match self.parser.push(byte) {
                        FrameOutcome::Incomplete => {
                            self.watchdog.arm();
                        }
                        FrameOutcome::ChecksumError | FrameOutcome::Oversize => {}
                        FrameOutcome::Frame => {
                            self.watchdog.arm();
                            let mut owned = [0u8; crate::constants::MAX_FRAME_SIZE];
                            let n = self.parser.payload().len();
                            owned[..n].copy_from_slice(self.parser.payload());
                            if let Some(outcome) = self.handle_frame(&owned[..n], wait_for_ack, &mut saw_invalid)? {
                                return Ok(outcome);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Dispatches one decoded frame payload: learns the sender's address
    /// unconditionally, then ACKs and buffers a correctly-sequenced
    /// `FIRMWARE_DELIVER`, drops (and maybe re-ACKs) an anomalous one, or
    /// reports the `ACK` this call was waiting for. Returns `None` to keep
    /// `poll`'s loop going.
    fn handle_frame(
        &mut self,
        payload: &[u8],
        wait_for_ack: Option<Sequence>,
        saw_invalid: &mut bool,
    ) -> Result<Option<PollOutcome>, TargetIoError<U::Error>> {
        let (address, data) = match envelope::decode_target_frame(payload) {
            Some(v) => v,
            None => return Ok(None),
        };
        self.peer = address;
        match AppMessage::decode(data) {
            Some(AppMessage::Ack { seq }) => {
                if wait_for_ack == Some(seq) {
                    Ok(Some(PollOutcome::AckObserved))
                } else {
                    Ok(None)
                }
            }
            Some(AppMessage::FirmwareDeliver { seq, payload }) => {
                let expected = self.in_seq.next();
                if seq == expected {
                    self.in_seq = expected;
                    self.inbound.fill(payload)?;
                    self.send_ack(expected)?;
                    *saw_invalid = false;
                    Ok(Some(PollOutcome::DataAccepted))
                } else {
                    if *saw_invalid {
                        if !self.in_seq.is_none() {
                            let last_good = self.in_seq;
                            self.send_ack(last_good)?;
                        }
                        *saw_invalid = false;
                    } else {
                        *saw_invalid = true;
                    }
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockUart {
        inbox: VecDeque<u8>,
        outbox: Vec<u8>,
    }

    impl MockUart {
        fn new(bytes: &[u8]) -> Self {
            MockUart { inbox: bytes.iter().copied().collect(), outbox: Vec::new() }
        }
    }

    impl Uart for MockUart {
        type Error = &'static str;

        fn read_byte(&mut self) -> Result<u8, Self::Error> {
            self.inbox.pop_front().ok_or("no more bytes")
        }

        fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
            self.outbox.push(byte);
            Ok(())
        }
    }

    struct CountingWatchdog {
        arms: u32,
    }

    impl Watchdog for CountingWatchdog {
        fn arm(&mut self) {
            self.arms += 1;
        }
    }

    /// Builds the bytes the target's own UART actually sees for an inbound
    /// datagram: a `RECEIVE_PACKET` (0x90)-shaped frame, the same shape a
    /// real radio delivers locally regardless of how the far end addressed
    /// it, matching `envelope::encode_receive_packet_direct`'s direct-mode
    /// synthesis of that shape.
    fn encode_data_frame(seq: u8, address: Address, app_seq: Sequence, payload: &[u8]) -> Vec<u8> {
        let msg = AppMessage::FirmwareDeliver { seq: app_seq, payload };
        let mut data = [0u8; 96];
        let data_len = msg.encode(&mut data).unwrap();
        let mut frame_payload = [0u8; 128];
        let payload_len =
            envelope::encode_receive_packet_direct(&mut frame_payload, seq, address, &data[..data_len]).unwrap();
        let mut frame = [0u8; 256];
        let frame_len = encode_frame(&frame_payload[..payload_len], &mut frame).unwrap();
        frame[..frame_len].to_vec()
    }

    #[test]
    fn sniffs_uart_mode_on_stk500_sync_byte() {
        let mut target = Target::new(MockUart::new(&[0x30, 0x20]), CountingWatchdog { arms: 0 });
        assert_eq!(target.recv_byte().unwrap(), 0x30);
        assert_eq!(target.recv_byte().unwrap(), 0x20);
        assert!(matches!(target.mode, Mode::Uart));
    }

    #[test]
    fn accepts_a_well_formed_data_frame_and_acks_it() {
        let address = Address::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let frame = encode_data_frame(9, address, Sequence(1), &[0xAA, 0xBB, 0xCC]);
        let mut target = Target::new(MockUart::new(&frame), CountingWatchdog { arms: 0 });

        assert_eq!(target.recv_byte().unwrap(), 0xAA);
        assert_eq!(target.recv_byte().unwrap(), 0xBB);
        assert_eq!(target.recv_byte().unwrap(), 0xCC);
        assert!(matches!(target.mode, Mode::Frame));
        // `peer` is learned from the frame unconditionally, but direct mode's
        // one-byte header misalignment (see `decode_target_frame`) means it
        // is not the original `address` verbatim; only genuine OTA framing
        // round-trips it exactly, so this is not asserted here.

        // The ACK the target sent back should itself decode as a transmit
        // request carrying an ACK of sequence 1.
        let sent = target.uart.outbox.clone();
        let mut parser = FrameParser::new();
        let mut last = FrameOutcome::Incomplete;
        for &b in &sent {
            last = parser.push(b);
        }
        assert_eq!(last, FrameOutcome::Frame);
        match envelope::decode(parser.payload()).unwrap() {
            envelope::Envelope::TransmitRequestDirect { data, .. } => {
                assert_eq!(AppMessage::decode(data), Some(AppMessage::Ack { seq: Sequence(1) }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sniffs_frame_mode_on_a_bare_receive_packet_byte_and_still_resyncs() {
        // A stray, unescaped 0x90 arrives with no preceding 0x7E (the real
        // delimiter was lost in transit). The target should commit to
        // framed mode from this byte alone, discard it without feeding the
        // parser, and still pick up a genuine frame that follows.
        let address = Address::new([0; 8]);
        let mut bytes = vec![api_type::RECEIVE_PACKET];
        bytes.extend(encode_data_frame(1, address, Sequence(1), &[0x42]));
        let mut target = Target::new(MockUart::new(&bytes), CountingWatchdog { arms: 0 });

        assert_eq!(target.recv_byte().unwrap(), 0x42);
        assert!(matches!(target.mode, Mode::Frame));
    }

    fn count_acks(bytes: &[u8]) -> usize {
        let mut parser = FrameParser::new();
        let mut acks = 0;
        for &b in bytes {
            if parser.push(b) == FrameOutcome::Frame {
                if let Some(envelope::Envelope::TransmitRequestDirect { data, .. }) = envelope::decode(parser.payload())
                {
                    if matches!(AppMessage::decode(data), Some(AppMessage::Ack { .. })) {
                        acks += 1;
                    }
                }
            }
        }
        acks
    }

    #[test]
    fn duplicate_sequence_is_dropped_and_reacked_after_two_anomalies() {
        let address = Address::new([9; 8]);
        let mut bytes = encode_data_frame(1, address, Sequence(1), &[0x01]);
        // Re-send the same (now stale) sequence twice more.
        bytes.extend(encode_data_frame(2, address, Sequence(1), &[0x01]));
        bytes.extend(encode_data_frame(3, address, Sequence(1), &[0x01]));

        let mut target = Target::new(MockUart::new(&bytes), CountingWatchdog { arms: 0 });
        assert_eq!(target.recv_byte().unwrap(), 0x01);
        assert_eq!(target.in_seq, Sequence(1));

        // Drains the two further (duplicate) frames internally; the mock
        // UART runs dry afterwards, so the next call errors.
        assert!(target.recv_byte().is_err());

        // One ACK for the original accept, one re-ACK tripped by the
        // second duplicate (the flip-flop tolerates the first silently).
        assert_eq!(count_acks(&target.uart.outbox), 2);
    }
}
