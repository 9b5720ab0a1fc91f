//! The UAVTalk wire format.
//!
//! Every frame is laid out as `sync | type | length | object id | instance id
//! | payload | checksum`, little-endian throughout, with the CRC-8 checksum
//! covering every preceding byte of the frame.

use thiserror::Error;

use crate::crc::crc8_update_many;

/// Sync byte that starts every frame.
pub const SYNC_VAL: u8 = 0x3C;

/// Sync (1) + type (1) + length (2) + object id (4) + instance id (2).
pub const HEADER_LENGTH: usize = 10;

/// The checksum trailer is a single CRC-8 byte.
pub const CHECKSUM_LENGTH: usize = 1;

/// Exclusive payload ceiling: a payload must be strictly smaller than this.
pub const MAX_PAYLOAD_LENGTH: usize = 256;

/// Largest frame the protocol can describe.
pub const MAX_PACKET_LENGTH: usize = HEADER_LENGTH + MAX_PAYLOAD_LENGTH + CHECKSUM_LENGTH;

/// Instance id sentinel meaning "all instances of this object".
pub const ALL_INSTANCES: u16 = 0xFFFF;

/// Mask selecting the protocol version bits of the type byte.
pub const TYPE_MASK: u8 = 0xF8;

/// Protocol version marker carried in the high bits of every type byte.
pub const TYPE_VER: u8 = 0x20;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}

/// The closed set of UAVTalk frame types.
///
/// The low bits discriminate the type, the high bits carry the protocol
/// version marker. A byte whose version bits do not match [`TYPE_VER`] is not
/// a frame type at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Plain object update, no reply expected.
    Object = TYPE_VER,
    /// Pull request, answered with an Object (or a Nack).
    ObjectRequest = TYPE_VER | 0x01,
    /// Object update that expects an Ack (or a Nack).
    ObjectAck = TYPE_VER | 0x02,
    /// Positive reply to an ObjectRequest/ObjectAck.
    Ack = TYPE_VER | 0x03,
    /// Negative reply.
    Nack = TYPE_VER | 0x04,
}

impl FrameType {
    /// Classifies a raw type byte, rejecting anything outside the closed set.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b if b == Self::Object as u8 => Some(Self::Object),
            b if b == Self::ObjectRequest as u8 => Some(Self::ObjectRequest),
            b if b == Self::ObjectAck as u8 => Some(Self::ObjectAck),
            b if b == Self::Ack as u8 => Some(Self::Ack),
            b if b == Self::Nack as u8 => Some(Self::Nack),
            _ => None,
        }
    }

    /// Whether frames of this type carry the target object's data bytes.
    /// ObjectRequest/Ack/Nack are header-only control frames.
    pub fn carries_payload(self) -> bool {
        matches!(self, Self::Object | Self::ObjectAck)
    }

    /// The reply type that completes a transaction opened by sending this
    /// frame type, if sending it opens one at all.
    pub fn expected_reply(self) -> Option<Self> {
        match self {
            Self::ObjectRequest => Some(Self::Object),
            Self::ObjectAck => Some(Self::Ack),
            _ => None,
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Object => "object",
            Self::ObjectRequest => "object request",
            Self::ObjectAck => "object (acked)",
            Self::Ack => "ack",
            Self::Nack => "nack",
        };
        f.write_str(name)
    }
}

/// One complete, validated UAVTalk wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub object_id: u32,
    pub instance_id: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Whether the frame addresses every instance of its object.
    pub fn is_all_instances(&self) -> bool {
        self.instance_id == ALL_INSTANCES
    }

    /// Encodes the frame for the wire. See [`build_frame`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        build_frame(self.frame_type, self.object_id, self.instance_id, &self.payload)
    }
}

/// Builds an outbound frame: header, payload, then the CRC-8 checksum of
/// every byte written so far.
///
/// The declared length field counts the whole frame except the checksum
/// byte, so a header-only control frame declares a length of 10.
pub fn build_frame(
    frame_type: FrameType,
    object_id: u32,
    instance_id: u16,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if payload.len() >= MAX_PAYLOAD_LENGTH {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }

    let mut encoded = Vec::with_capacity(HEADER_LENGTH + payload.len() + CHECKSUM_LENGTH);
    encoded.push(SYNC_VAL);
    encoded.push(frame_type as u8);
    encoded.extend_from_slice(&((HEADER_LENGTH + payload.len()) as u16).to_le_bytes());
    encoded.extend_from_slice(&object_id.to_le_bytes());
    encoded.extend_from_slice(&instance_id.to_le_bytes());
    encoded.extend_from_slice(payload);
    encoded.push(crc8_update_many(0, &encoded));

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc8;

    #[test]
    fn header_only_request() {
        // ObjectRequest for object id 1, instance 0: declared length 10,
        // no payload, checksum over the ten header bytes.
        let encoded = build_frame(FrameType::ObjectRequest, 1, 0, &[]).unwrap();
        assert_eq!(
            encoded,
            [0x3C, 0x21, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0xBC]
        );
    }

    #[test]
    fn length_and_checksum_cover_payload() {
        let payload = [0x11, 0x22, 0x33, 0x44];
        let encoded = build_frame(FrameType::Object, 0xDEADBEEF, 3, &payload).unwrap();

        assert_eq!(encoded.len(), HEADER_LENGTH + payload.len() + CHECKSUM_LENGTH);
        // Total length field counts header + payload.
        assert_eq!(
            u16::from_le_bytes([encoded[2], encoded[3]]) as usize,
            HEADER_LENGTH + payload.len()
        );
        // Object id must round-trip through the full unsigned range.
        assert_eq!(
            u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]),
            0xDEADBEEF
        );
        let (body, checksum) = encoded.split_at(encoded.len() - 1);
        assert_eq!(checksum[0], crc8(body));
    }

    #[test]
    fn payload_ceiling() {
        let big = vec![0u8; MAX_PAYLOAD_LENGTH];
        assert_eq!(
            build_frame(FrameType::Object, 1, 0, &big),
            Err(EncodeError::PayloadTooLarge(MAX_PAYLOAD_LENGTH))
        );

        let largest = vec![0u8; MAX_PAYLOAD_LENGTH - 1];
        assert!(build_frame(FrameType::Object, 1, 0, &largest).is_ok());
    }

    #[test]
    fn type_byte_classification() {
        assert_eq!(FrameType::from_byte(0x20), Some(FrameType::Object));
        assert_eq!(FrameType::from_byte(0x21), Some(FrameType::ObjectRequest));
        assert_eq!(FrameType::from_byte(0x22), Some(FrameType::ObjectAck));
        assert_eq!(FrameType::from_byte(0x23), Some(FrameType::Ack));
        assert_eq!(FrameType::from_byte(0x24), Some(FrameType::Nack));
        // Wrong version bits.
        assert_eq!(FrameType::from_byte(0x41), None);
        // Version bits right, discriminator out of range.
        assert_eq!(FrameType::from_byte(0x25), None);
    }

    #[test]
    fn expected_replies() {
        assert_eq!(FrameType::ObjectRequest.expected_reply(), Some(FrameType::Object));
        assert_eq!(FrameType::ObjectAck.expected_reply(), Some(FrameType::Ack));
        assert_eq!(FrameType::Object.expected_reply(), None);
        assert_eq!(FrameType::Ack.expected_reply(), None);
        assert_eq!(FrameType::Nack.expected_reply(), None);
    }
}
