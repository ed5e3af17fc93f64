//! Escaped API mode (`AP=2`) byte stuffing.
//!
//! Four bytes are special on the wire: the start delimiter and the two
//! software flow-control bytes, plus the escape lead-in itself. Any of
//! them appearing inside the length field, payload, or checksum is
//! transmitted as `{ESCAPE, byte ^ ESCAPE_XOR}` instead of literally.

use crate::constants::{ESCAPE, ESCAPE_XOR, START_DELIMITER, XOFF, XON};
use crate::cursor::Cursor;
use crate::error::FrameError;

pub fn needs_escape(byte: u8) -> bool {
    matches!(byte, START_DELIMITER | ESCAPE | XON | XOFF)
}

/// Writes `byte`, escaping it first if required. Used by anything that
/// assembles an outgoing frame body (the frame codec, and the target's
/// direct UART writer before a frame codec even exists).
pub fn put_escaped(out: &mut Cursor, byte: u8) -> Result<(), FrameError> {
    if needs_escape(byte) {
        out.put(ESCAPE)?;
        out.put(byte ^ ESCAPE_XOR)?;
    } else {
        out.put(byte)?;
    }
    Ok(())
}

pub fn encode_escaped(input: &[u8], out: &mut Cursor) -> Result<(), FrameError> {
    for &b in input {
        put_escaped(out, b)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(input: &[u8]) -> [u8; 32] {
        let mut buf = [0u8; 32];
        {
            let mut cursor = Cursor::new(&mut buf);
            encode_escaped(input, &mut cursor).unwrap();
        }
        buf
    }

    #[test]
    fn passes_through_ordinary_bytes() {
        let mut buf = [0u8; 8];
        let mut cursor = Cursor::new(&mut buf);
        encode_escaped(&[0x01, 0x02, 0xAA], &mut cursor).unwrap();
        assert_eq!(cursor.written(), &[0x01, 0x02, 0xAA]);
    }

    #[test]
    fn escapes_start_delimiter() {
        let mut buf = [0u8; 8];
        let mut cursor = Cursor::new(&mut buf);
        encode_escaped(&[START_DELIMITER], &mut cursor).unwrap();
        assert_eq!(cursor.written(), &[ESCAPE, START_DELIMITER ^ ESCAPE_XOR]);
    }

    #[test]
    fn escapes_all_four_special_bytes() {
        let mut buf = [0u8; 8];
        let mut cursor = Cursor::new(&mut buf);
        encode_escaped(&[ESCAPE, XON, XOFF], &mut cursor).unwrap();
        assert_eq!(
            cursor.written(),
            &[
                ESCAPE,
                ESCAPE ^ ESCAPE_XOR,
                ESCAPE,
                XON ^ ESCAPE_XOR,
                ESCAPE,
                XOFF ^ ESCAPE_XOR,
            ]
        );
    }

    #[test]
    fn buffer_reported_length_matches_escaped_bytes() {
        let result = encode(&[0x7E, 0x01]);
        assert_eq!(&result[..4], &[ESCAPE, 0x7E ^ ESCAPE_XOR, 0x01, 0x00]);
    }
}
