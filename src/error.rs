//! Error types for the transport.
//!
//! [`FrameError`] is the shared, dependency-free error produced by the
//! codec layers (escape codec, frame codec, envelope layer) and is usable
//! from both `std` and `target` builds. [`HostError`] wraps it for the
//! host-side facade with a `thiserror` derive; [`TargetError`] wraps it for
//! the bootloader-resident state machine with optional `defmt::Format` for
//! wire-cheap logging.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The destination buffer was too small to hold the encoded frame.
    BufferTooSmall,
    /// A decoded length field claimed a payload larger than the codec's
    /// maximum (256 bytes, matching the original 8-bit length encoding).
    Oversize,
    /// The trailing checksum byte did not match the computed checksum.
    BadChecksum,
}

#[cfg(feature = "std")]
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("malformed port specification: {0}")]
    BadPortSyntax(String),

    #[error("malformed XBee address: {0}")]
    BadAddress(String),

    #[error("frame codec error: {0:?}")]
    Frame(FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("AT command {cmd:?} failed with status {status}")]
    AtFailure { cmd: [u8; 2], status: u8 },

    #[error("reassembly buffer overrun")]
    ReassemblyOverrun,

    #[error("target did not answer the reset sequence")]
    NoResponse,
}

#[cfg(feature = "std")]
impl From<FrameError> for HostError {
    fn from(e: FrameError) -> Self {
        HostError::Frame(e)
    }
}

#[cfg(feature = "std")]
impl HostError {
    /// Maps an error onto the legacy integer contract avrdude's xbee
    /// programmer plugin used: a generic failure is `-1`, and an AT-level
    /// failure carries its status byte through `-512+status` so a caller
    /// that checks `< 0` can recover the raw status by adding 512 back.
    pub fn exit_code(&self) -> i32 {
        match self {
            HostError::AtFailure { status, .. } => crate::atcmd::status_to_return_code(*status),
            _ => -1,
        }
    }
}

#[cfg(feature = "target")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetError {
    ChecksumMismatch,
    FrameTooLarge,
    UnexpectedSequence,
    BufferFull,
}

#[cfg(feature = "target")]
impl From<FrameError> for TargetError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::BufferTooSmall => TargetError::BufferFull,
            FrameError::Oversize => TargetError::FrameTooLarge,
            FrameError::BadChecksum => TargetError::ChecksumMismatch,
        }
    }
}
