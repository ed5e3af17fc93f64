#![cfg_attr(not(feature = "std"), no_std)]

//! STK500v1-over-XBee OTA programming transport.
//!
//! This crate implements the wire protocol avrdude's xbee programmer
//! plugin and the matching Optiboot-derived bootloader speak to tunnel a
//! STK500v1 serial-programming session through an XBee Series 2 radio
//! running escaped API mode (`AP=2`), or over a direct wire with no radio
//! at all. It does not implement STK500v1 itself, Intel HEX parsing, flash
//! programming, or serial port drivers — only the framing, addressing,
//! reliable-datagram, and radio-configuration layers between a programmer
//! and a bootloader.
//!
//! The crate is split along the same line the wire protocol is: the `std`
//! feature builds the host-side [`host`] facade (real serial I/O via the
//! `serialport` crate, `log`-based diagnostics, `thiserror` error types);
//! the `target` feature builds the `no_std` [`target`] state machine meant
//! to run inside the bootloader itself (`defmt` diagnostics, fixed-size
//! buffers, no heap). Both sides share the codec layers in this crate
//! root, which depend on neither feature.
//!
//! # Layers
//!
//! - [`escape`]: escaped API mode byte stuffing.
//! - [`frame`]: `{0x7E, lenHi, lenLo, payload…, checksum}` framing and the
//!   resyncing parser that is this wire's only corruption-recovery
//!   mechanism.
//! - [`envelope`]: the addressed API frame payload shapes (transmit
//!   request, receive packet, local/remote AT command and response,
//!   transmit status).
//! - [`app`]: the reliable stop-and-wait datagram protocol (ACK/REQUEST)
//!   carried inside a transmit/receive payload.
//! - [`address`]: the 10-byte XBee address and its hex parsing.
//! - [`atcmd`]: AT command status codes.
//! - [`host`] (feature `std`): the host transport facade.
//! - [`target`] (feature `target`): the bootloader-resident state machine.

mod cursor;

pub mod address;
pub mod app;
pub mod atcmd;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod escape;
pub mod frame;
pub mod seq;

#[cfg(feature = "std")]
mod ring;

#[cfg(feature = "std")]
pub mod host;

#[cfg(feature = "target")]
pub mod target;

pub use address::Address;
pub use error::FrameError;
pub use seq::Sequence;

#[cfg(feature = "std")]
pub use error::HostError;
#[cfg(feature = "target")]
pub use error::TargetError;
