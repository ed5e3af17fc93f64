//! Addressed envelope layer: the seven API frame payload shapes exchanged
//! over the wire, built directly atop the frame codec's unescaped payload
//! bytes (the API type byte onward, excluding length/checksum).
//!
//! Encoding intentionally mirrors `sendAPIRequest`'s single generic builder
//! rather than one bespoke function per shape: several of these frames
//! share the same "apiType, optional sequence byte, optional 10-byte
//! address" prefix, and the quirks of which fields are present for which
//! apiType are easiest to keep faithful by keeping the one code path.

use crate::address::{Address, ADDRESS_LEN};
use crate::constants::api_type;
use crate::cursor::Cursor;
use crate::error::FrameError;

/// Builds a `TRANSMIT_REQUEST` (0x10) frame payload: `apiType, seq, addr(10),
/// radius, options, data`. Used by the host when sending over a real radio
/// link (OTA mode) and by the target for every outbound frame it ever
/// sends, regardless of mode.
pub fn encode_transmit_request(
    out: &mut [u8],
    seq: u8,
    address: Address,
    radius: u8,
    options: u8,
    data: &[u8],
) -> Result<usize, FrameError> {
    let mut cursor = Cursor::new(out);
    cursor.put(api_type::TRANSMIT_REQUEST)?;
    cursor.put(seq)?;
    cursor.put_slice(&address.to_bytes())?;
    cursor.put(radius)?;
    cursor.put(options)?;
    cursor.put_slice(data)?;
    Ok(cursor.position())
}

/// Builds a `RECEIVE_PACKET` (0x90) frame payload in the shape the host
/// synthesizes for a "direct" (wired, no radio) session: `apiType, seq,
/// addr(10), data`. A genuine radio-sourced 0x90 never carries this
/// `seq` byte (see [`decode`]); this shape only ever travels host → target
/// over a direct wire, where the target's frame parser does not
/// distinguish it from a real one (see [`decode_target_frame`]).
pub fn encode_receive_packet_direct(
    out: &mut [u8],
    seq: u8,
    address: Address,
    data: &[u8],
) -> Result<usize, FrameError> {
    let mut cursor = Cursor::new(out);
    cursor.put(api_type::RECEIVE_PACKET)?;
    cursor.put(seq)?;
    cursor.put_slice(&address.to_bytes())?;
    cursor.put_slice(data)?;
    Ok(cursor.position())
}

/// Builds a `LOCAL_AT_COMMAND` (0x08) frame payload: `apiType, seq, cmd(2),
/// value…`. Local AT commands carry no address; they target the host's own
/// radio.
pub fn encode_local_at(
    out: &mut [u8],
    seq: u8,
    cmd: [u8; 2],
    value: &[u8],
) -> Result<usize, FrameError> {
    let mut cursor = Cursor::new(out);
    cursor.put(api_type::LOCAL_AT_COMMAND)?;
    cursor.put(seq)?;
    cursor.put_slice(&cmd)?;
    cursor.put_slice(value)?;
    Ok(cursor.position())
}

/// Builds a `REMOTE_AT_COMMAND` (0x17) frame payload: `apiType, seq,
/// addr(10), applyFlags, cmd(2), value…`.
pub fn encode_remote_at(
    out: &mut [u8],
    seq: u8,
    address: Address,
    apply_flags: u8,
    cmd: [u8; 2],
    value: &[u8],
) -> Result<usize, FrameError> {
    let mut cursor = Cursor::new(out);
    cursor.put(api_type::REMOTE_AT_COMMAND)?;
    cursor.put(seq)?;
    cursor.put_slice(&address.to_bytes())?;
    cursor.put(apply_flags)?;
    cursor.put_slice(&cmd)?;
    cursor.put_slice(value)?;
    Ok(cursor.position())
}

/// Decoded shapes the host ever receives. Dispatch is purely on the wire
/// `apiType` byte — never on which session mode is active, since a direct
/// session can legitimately see `TransmitRequestDirect` frames (the
/// target's own un-relayed output) while an OTA session sees genuine
/// `ReceivePacket` frames relayed by the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope<'a> {
    /// `0x10`: either the target's own output seen unmodified on a direct
    /// wire, or (in principle) a transmit request echoed back.
    TransmitRequestDirect {
        seq: u8,
        address: Address,
        radius: u8,
        options: u8,
        data: &'a [u8],
    },
    /// `0x90`: a genuine radio-relayed receive packet. Carries no envelope
    /// sequence byte; carries the sender's address, which the host must
    /// learn/validate.
    ReceivePacket {
        address: Address,
        rx_options: u8,
        data: &'a [u8],
    },
    /// `0x88`: local AT command response.
    LocalAtResponse {
        seq: u8,
        cmd: [u8; 2],
        status: u8,
        value: &'a [u8],
    },
    /// `0x97`: remote AT command response.
    RemoteAtResponse {
        seq: u8,
        address: Address,
        cmd: [u8; 2],
        status: u8,
        value: &'a [u8],
    },
    /// `0x8B`: transmit status, reporting delivery of a previous 0x10.
    TransmitStatus {
        seq: u8,
        addr16: [u8; 2],
        retries: u8,
        delivery_status: u8,
        discovery_status: u8,
    },
}

pub fn decode(payload: &[u8]) -> Option<Envelope<'_>> {
    let frame_type = *payload.first()?;
    match frame_type {
        api_type::TRANSMIT_REQUEST => {
            if payload.len() < 2 + ADDRESS_LEN + 2 {
                return None;
            }
            let seq = payload[1];
            let address = Address::from_bytes(&payload[2..2 + ADDRESS_LEN])?;
            let radius = payload[2 + ADDRESS_LEN];
            let options = payload[3 + ADDRESS_LEN];
            let data = &payload[4 + ADDRESS_LEN..];
            Some(Envelope::TransmitRequestDirect { seq, address, radius, options, data })
        }
        api_type::RECEIVE_PACKET => {
            if payload.len() < 1 + ADDRESS_LEN + 1 {
                return None;
            }
            let address = Address::from_bytes(&payload[1..1 + ADDRESS_LEN])?;
            let rx_options = payload[1 + ADDRESS_LEN];
            let data = &payload[2 + ADDRESS_LEN..];
            Some(Envelope::ReceivePacket { address, rx_options, data })
        }
        api_type::LOCAL_AT_RESPONSE => {
            if payload.len() < 5 {
                return None;
            }
            let seq = payload[1];
            let cmd = [payload[2], payload[3]];
            let status = payload[4];
            let value = &payload[5..];
            Some(Envelope::LocalAtResponse { seq, cmd, status, value })
        }
        api_type::REMOTE_AT_RESPONSE => {
            if payload.len() < 2 + ADDRESS_LEN + 1 + 2 + 1 {
                return None;
            }
            let seq = payload[1];
            let address = Address::from_bytes(&payload[2..2 + ADDRESS_LEN])?;
            let cmd_offset = 2 + ADDRESS_LEN;
            let cmd = [payload[cmd_offset], payload[cmd_offset + 1]];
            let status = payload[cmd_offset + 2];
            let value = &payload[cmd_offset + 3..];
            Some(Envelope::RemoteAtResponse { seq, address, cmd, status, value })
        }
        api_type::TRANSMIT_STATUS => {
            if payload.len() < 7 {
                return None;
            }
            let seq = payload[1];
            let addr16 = [payload[2], payload[3]];
            let retries = payload[4];
            let delivery_status = payload[5];
            let discovery_status = payload[6];
            Some(Envelope::TransmitStatus { seq, addr16, retries, delivery_status, discovery_status })
        }
        _ => None,
    }
}

/// Extracts the application datagram (address + payload) from a frame
/// addressed to the target: `apiType(0x90), [10 bytes treated as address],
/// [1 byte ignored], data…`.
///
/// This is deliberately not expressed in terms of [`decode`]'s
/// `ReceivePacket` variant: the target's bootloader never distinguishes a
/// genuine radio-relayed 0x90 from a host-synthesized direct-mode one, and
/// reproduces the original firmware's byte-offset extraction verbatim,
/// including the one-byte misalignment direct mode produces (harmless,
/// since a direct session's address is all zero and never validated).
pub fn decode_target_frame(payload: &[u8]) -> Option<(Address, &[u8])> {
    const HEADER_LEN: usize = 12;
    if payload.len() < HEADER_LEN || payload[0] != api_type::RECEIVE_PACKET {
        return None;
    }
    let address = Address::from_bytes(&payload[1..11])?;
    Some((address, &payload[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address { addr64: [1, 2, 3, 4, 5, 6, 7, 8], addr16: [0x12, 0x34] }
    }

    #[test]
    fn transmit_request_roundtrips() {
        let mut buf = [0u8; 64];
        let data = [0xAA, 0xBB];
        let len = encode_transmit_request(&mut buf, 7, addr(), 0, 0, &data).unwrap();
        match decode(&buf[..len]).unwrap() {
            Envelope::TransmitRequestDirect { seq, address, radius, options, data: d } => {
                assert_eq!(seq, 7);
                assert_eq!(address, addr());
                assert_eq!(radius, 0);
                assert_eq!(options, 0);
                assert_eq!(d, &data);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn local_at_response_decodes() {
        let payload = [api_type::LOCAL_AT_RESPONSE, 3, b'A', b'P', 0, 2];
        match decode(&payload).unwrap() {
            Envelope::LocalAtResponse { seq, cmd, status, value } => {
                assert_eq!(seq, 3);
                assert_eq!(cmd, *b"AP");
                assert_eq!(status, 0);
                assert_eq!(value, &[2]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn genuine_receive_packet_has_no_seq_byte() {
        let mut buf = [0u8; 32];
        let mut cursor = Cursor::new(&mut buf);
        cursor.put(api_type::RECEIVE_PACKET).unwrap();
        cursor.put_slice(&addr().to_bytes()).unwrap();
        cursor.put(0x01).unwrap(); // rxOptions
        cursor.put_slice(&[9, 9]).unwrap();
        let len = cursor.position();
        match decode(&buf[..len]).unwrap() {
            Envelope::ReceivePacket { address, rx_options, data } => {
                assert_eq!(address, addr());
                assert_eq!(rx_options, 0x01);
                assert_eq!(data, &[9, 9]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn target_frame_extraction_matches_transmit_request_direct_encoding() {
        // The host's direct-mode encoder and the target's frame parser
        // must agree on where data starts even though the former writes a
        // seq byte the latter does not interpret as one.
        let mut buf = [0u8; 64];
        let data = [1, 2, 3, 4];
        let len = encode_receive_packet_direct(&mut buf, 42, addr(), &data).unwrap();
        let (_captured_address, decoded_data) = decode_target_frame(&buf[..len]).unwrap();
        assert_eq!(decoded_data, &data);
    }
}
