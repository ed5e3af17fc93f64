//! Application-layer reliable-datagram messages carried inside a
//! transmit-request/receive-packet data payload: `ACK(seq)` and
//! `REQUEST(seq, appType, payload…)`.

use crate::constants::{app_packet_type, app_type};
use crate::cursor::Cursor;
use crate::error::FrameError;
use crate::seq::Sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMessage<'a> {
    Ack { seq: Sequence },
    FirmwareDeliver { seq: Sequence, payload: &'a [u8] },
    FirmwareReply { seq: Sequence, payload: &'a [u8] },
}

impl<'a> AppMessage<'a> {
    pub fn seq(&self) -> Sequence {
        match self {
            AppMessage::Ack { seq } => *seq,
            AppMessage::FirmwareDeliver { seq, .. } => *seq,
            AppMessage::FirmwareReply { seq, .. } => *seq,
        }
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        let mut cursor = Cursor::new(out);
        match self {
            AppMessage::Ack { seq } => {
                cursor.put(app_packet_type::ACK)?;
                cursor.put(seq.value())?;
            }
            AppMessage::FirmwareDeliver { seq, payload } => {
                cursor.put(app_packet_type::REQUEST)?;
                cursor.put(seq.value())?;
                cursor.put(app_type::FIRMWARE_DELIVER)?;
                cursor.put_slice(payload)?;
            }
            AppMessage::FirmwareReply { seq, payload } => {
                cursor.put(app_packet_type::REQUEST)?;
                cursor.put(seq.value())?;
                cursor.put(app_type::FIRMWARE_REPLY)?;
                cursor.put_slice(payload)?;
            }
        }
        Ok(cursor.position())
    }

    pub fn decode(data: &'a [u8]) -> Option<AppMessage<'a>> {
        let packet_type = *data.first()?;
        let seq = Sequence::from(*data.get(1)?);
        match packet_type {
            app_packet_type::ACK => Some(AppMessage::Ack { seq }),
            app_packet_type::REQUEST => {
                let app = *data.get(2)?;
                let payload = &data[3..];
                match app {
                    app_type::FIRMWARE_DELIVER => Some(AppMessage::FirmwareDeliver { seq, payload }),
                    app_type::FIRMWARE_REPLY => Some(AppMessage::FirmwareReply { seq, payload }),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_roundtrips() {
        let mut buf = [0u8; 8];
        let msg = AppMessage::Ack { seq: Sequence(5) };
        let len = msg.encode(&mut buf).unwrap();
        assert_eq!(AppMessage::decode(&buf[..len]), Some(msg));
    }

    #[test]
    fn firmware_deliver_roundtrips() {
        let mut buf = [0u8; 64];
        let payload = [1, 2, 3];
        let msg = AppMessage::FirmwareDeliver { seq: Sequence(9), payload: &payload };
        let len = msg.encode(&mut buf).unwrap();
        assert_eq!(AppMessage::decode(&buf[..len]), Some(msg));
    }

    #[test]
    fn unknown_app_type_fails_to_decode() {
        let data = [app_packet_type::REQUEST, 1, 0xFF, 0, 0];
        assert_eq!(AppMessage::decode(&data), None);
    }
}
