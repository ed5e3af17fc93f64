//! Wire-format constants shared by every layer of the transport.
//!
//! Grouped the way the original `xbee.c`/`xbeeboot.c` group their `#define`s:
//! escape-codec bytes, API frame type tags, application-layer message tags,
//! and the size/retry budgets that bound both sides of the link.

/// Escaped API mode (`AP=2`) start-of-frame marker. Never appears escaped.
pub const START_DELIMITER: u8 = 0x7E;
/// Escape lead-in byte.
pub const ESCAPE: u8 = 0x7D;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;
/// XOR mask applied to an escaped byte's value.
pub const ESCAPE_XOR: u8 = 0x20;

/// API frame identifiers (first byte of the unescaped frame payload).
pub mod api_type {
    pub const TRANSMIT_REQUEST: u8 = 0x10;
    pub const RECEIVE_PACKET: u8 = 0x90;
    pub const LOCAL_AT_COMMAND: u8 = 0x08;
    pub const LOCAL_AT_RESPONSE: u8 = 0x88;
    pub const REMOTE_AT_COMMAND: u8 = 0x17;
    pub const REMOTE_AT_RESPONSE: u8 = 0x97;
    pub const TRANSMIT_STATUS: u8 = 0x8B;
}

/// Application-layer packet tags (first byte of the datagram after the
/// envelope header).
pub mod app_packet_type {
    pub const ACK: u8 = 0x00;
    pub const REQUEST: u8 = 0x01;
}

/// Application-layer payload tags carried by a `REQUEST` datagram.
pub mod app_type {
    pub const FIRMWARE_DELIVER: u8 = 23;
    pub const FIRMWARE_REPLY: u8 = 24;
}

/// Remote AT "apply changes immediately" option flag.
pub const REMOTE_AT_APPLY_NOW: u8 = 0x02;

/// Maximum raw (unescaped) frame size; the length field is a 16-bit
/// big-endian count but the original encodes it in a single `frame[256]`
/// buffer, so payloads above this are rejected outright.
pub const MAX_FRAME_SIZE: usize = 256;

/// Largest ZigBee API payload either side will ever try to push through the
/// radio at once: 84-byte max RF payload, minus ZigBee network layer (18),
/// APS layer (9), and the 3-byte application header (packetType, sequence,
/// appType).
pub const TARGET_MAX_CHUNK: usize = 84 - 18 - 9 - 3;

/// Host-side chunk cap. The host is not subject to the target's tighter RF
/// payload budget (it has no fixed-size packet buffer to fit the header
/// into) and chunks at a round 64 bytes instead, matching the original
/// plugin's `xbeedev_send`.
pub const HOST_MAX_CHUNK: usize = 64;

/// Retry budgets bounding the AT-command and data-frame recovery loops.
pub const LOCAL_AT_RETRIES: u32 = 5;
pub const REMOTE_AT_RETRIES: u32 = 30;
pub const RECV_RETRIES: u32 = 30;

/// DTR/RTS reset pulse timings.
pub const RESET_PULSE_LOW_MS: u64 = 250;
pub const RESET_PULSE_HIGH_MS: u64 = 50;

/// Default serial parameters.
pub const DEFAULT_BAUD_OTA: u32 = 9600;
pub const DEFAULT_BAUD_DIRECT: u32 = 19200;

/// Target-side watchdog timeout; the sole liveness guarantee on a link with
/// interrupts disabled and no background reader.
pub const WATCHDOG_TIMEOUT_SECS: u8 = 8;

/// Size of the host-side reassembly ring buffer.
pub const REASSEMBLY_BUFFER_SIZE: usize = 256;

/// STK500v1 `Cmnd_STK_GET_SYNC`, the first byte of any raw (non-framed)
/// programming session. Seeing this as the very first byte on the target's
/// UART is how it tells a directly-attached host apart from an API-framed
/// one (see `target::Target`'s mode sniff).
pub const STK500_SYNC_BYTE: u8 = 0x30;
