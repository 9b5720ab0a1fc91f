//! The incremental receive state machine.
//!
//! [`RxMachine`] turns an unreliable byte-at-a-time input into validated
//! [`Frame`]s. It owns all per-frame scratch state (running checksum, byte
//! counters, payload buffer) and is meant to be driven by exactly one reader;
//! a second concurrent receive loop needs its own machine.
//!
//! Every rejection is local: the machine parks in [`RxState::Error`] (or
//! completes) and the very next byte restarts the sync search, so the stream
//! self-heals after corruption without outside intervention.

use log::trace;
use thiserror::Error;

use crate::catalog::ObjectCatalog;
use crate::crc::crc8_update;
use crate::frame::{
    Frame, FrameType, HEADER_LENGTH, MAX_PAYLOAD_LENGTH, SYNC_VAL, TYPE_MASK, TYPE_VER,
};

/// Frame-level corruption detected while assembling a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("type byte {0:#04x} does not carry the protocol version marker")]
    InvalidType(u8),

    #[error("declared frame length {0} is outside the valid range")]
    InvalidLength(usize),

    #[error("declared length {declared} does not match header plus expected payload {expected}")]
    LengthMismatch { declared: usize, expected: usize },

    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    ChecksumMismatch { computed: u8, received: u8 },
}

/// Why a byte was dropped instead of advancing a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Noise while searching for the sync byte. Not counted as an error.
    #[error("searching for sync")]
    SyncSearch,

    #[error(transparent)]
    Framing(FramingError),

    #[error("unknown object id {0:#010X}")]
    UnknownObject(u32),

    #[error("expected payload of {0} bytes is at or above the frame limit")]
    PayloadTooLarge(usize),
}

/// Result of feeding one byte to the receive machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Byte consumed, frame still incomplete.
    AwaitingMore,
    /// A full frame passed every check and is handed to the caller.
    FramedOk(Frame),
    /// Byte dropped; the machine will resynchronize on the next sync byte.
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Sync,
    Type,
    Size,
    ObjectId,
    InstanceId,
    Data,
    Checksum,
    Complete,
    Error,
}

/// Receive state machine: `Sync → Type → Size → ObjectId → InstanceId →
/// Data → Checksum → {Complete | Error}`.
#[derive(Debug)]
pub struct RxMachine {
    state: RxState,
    /// Running CRC over every frame byte except the checksum itself.
    crc: u8,
    /// Declared total length from the size field (header + payload).
    packet_size: usize,
    /// Bytes consumed for the current frame, including the sync byte.
    packet_length: usize,
    /// Bytes collected so far within the current multi-byte field.
    count: usize,
    frame_type: FrameType,
    object_id: u32,
    instance_id: u16,
    /// Expected payload length resolved from the frame type and catalog.
    payload_length: usize,
    scratch: [u8; 4],
    payload: Vec<u8>,
}

impl Default for RxMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RxMachine {
    pub fn new() -> Self {
        Self {
            state: RxState::Sync,
            crc: 0,
            packet_size: 0,
            packet_length: 0,
            count: 0,
            frame_type: FrameType::Object,
            object_id: 0,
            instance_id: 0,
            payload_length: 0,
            scratch: [0; 4],
            payload: vec![0; MAX_PAYLOAD_LENGTH],
        }
    }

    fn reject(&mut self, reason: DiscardReason) -> FrameOutcome {
        trace!("discarding frame: {}", reason);
        self.state = RxState::Error;
        FrameOutcome::Discarded(reason)
    }

    /// Advances the machine by one byte.
    ///
    /// The catalog is consulted once per frame, after the instance id
    /// completes, to resolve the expected payload length of the target
    /// object.
    pub fn feed<C: ObjectCatalog>(&mut self, byte: u8, catalog: &C) -> FrameOutcome {
        // Error and Complete are terminal for the previous frame only; the
        // next byte begins a fresh sync search.
        if matches!(self.state, RxState::Complete | RxState::Error) {
            self.state = RxState::Sync;
        }

        self.packet_length += 1;

        match self.state {
            RxState::Sync => {
                if byte != SYNC_VAL {
                    return FrameOutcome::Discarded(DiscardReason::SyncSearch);
                }

                self.crc = crc8_update(0, byte);
                self.packet_length = 1;
                self.count = 0;
                self.state = RxState::Type;
                FrameOutcome::AwaitingMore
            }

            RxState::Type => {
                self.crc = crc8_update(self.crc, byte);

                if byte & TYPE_MASK != TYPE_VER {
                    // Wrong version bits; fall straight back to the sync
                    // search rather than the error state.
                    self.state = RxState::Sync;
                    return FrameOutcome::Discarded(DiscardReason::Framing(
                        FramingError::InvalidType(byte),
                    ));
                }
                let Some(frame_type) = FrameType::from_byte(byte) else {
                    self.state = RxState::Sync;
                    return FrameOutcome::Discarded(DiscardReason::Framing(
                        FramingError::InvalidType(byte),
                    ));
                };

                self.frame_type = frame_type;
                self.packet_size = 0;
                self.state = RxState::Size;
                FrameOutcome::AwaitingMore
            }

            RxState::Size => {
                self.crc = crc8_update(self.crc, byte);

                self.scratch[self.count] = byte;
                self.count += 1;
                if self.count < 2 {
                    return FrameOutcome::AwaitingMore;
                }
                self.count = 0;

                self.packet_size = u16::from_le_bytes([self.scratch[0], self.scratch[1]]) as usize;
                if self.packet_size < HEADER_LENGTH
                    || self.packet_size > HEADER_LENGTH + MAX_PAYLOAD_LENGTH
                {
                    return self.reject(DiscardReason::Framing(FramingError::InvalidLength(
                        self.packet_size,
                    )));
                }

                self.state = RxState::ObjectId;
                FrameOutcome::AwaitingMore
            }

            RxState::ObjectId => {
                self.crc = crc8_update(self.crc, byte);

                self.scratch[self.count] = byte;
                self.count += 1;
                if self.count < 4 {
                    return FrameOutcome::AwaitingMore;
                }
                self.count = 0;

                // The id space is the full unsigned 32-bit range.
                self.object_id = u32::from_le_bytes(self.scratch);
                self.state = RxState::InstanceId;
                FrameOutcome::AwaitingMore
            }

            RxState::InstanceId => {
                self.crc = crc8_update(self.crc, byte);

                self.scratch[self.count] = byte;
                self.count += 1;
                if self.count < 2 {
                    return FrameOutcome::AwaitingMore;
                }
                self.count = 0;

                self.instance_id = u16::from_le_bytes([self.scratch[0], self.scratch[1]]);

                // The header is complete; resolve the target object to learn
                // the payload length this frame must carry.
                let Some(meta) = catalog.lookup(self.object_id) else {
                    return self.reject(DiscardReason::UnknownObject(self.object_id));
                };

                self.payload_length = if self.frame_type.carries_payload() {
                    meta.num_bytes
                } else {
                    0
                };

                if self.payload_length >= MAX_PAYLOAD_LENGTH {
                    return self.reject(DiscardReason::PayloadTooLarge(self.payload_length));
                }

                // Primary defense against a corrupted size field that still
                // pointed at a valid object id.
                if self.packet_length + self.payload_length != self.packet_size {
                    return self.reject(DiscardReason::Framing(FramingError::LengthMismatch {
                        declared: self.packet_size,
                        expected: self.packet_length + self.payload_length,
                    }));
                }

                self.state = if self.payload_length > 0 {
                    RxState::Data
                } else {
                    RxState::Checksum
                };
                FrameOutcome::AwaitingMore
            }

            RxState::Data => {
                self.crc = crc8_update(self.crc, byte);

                self.payload[self.count] = byte;
                self.count += 1;
                if self.count < self.payload_length {
                    return FrameOutcome::AwaitingMore;
                }
                self.count = 0;

                self.state = RxState::Checksum;
                FrameOutcome::AwaitingMore
            }

            RxState::Checksum => {
                // The checksum byte itself is compared, not folded in.
                if byte != self.crc {
                    return self.reject(DiscardReason::Framing(FramingError::ChecksumMismatch {
                        computed: self.crc,
                        received: byte,
                    }));
                }

                if self.packet_length != self.packet_size + 1 {
                    return self.reject(DiscardReason::Framing(FramingError::LengthMismatch {
                        declared: self.packet_size + 1,
                        expected: self.packet_length,
                    }));
                }

                self.state = RxState::Complete;
                FrameOutcome::FramedOk(Frame {
                    frame_type: self.frame_type,
                    object_id: self.object_id,
                    instance_id: self.instance_id,
                    payload: self.payload[..self.payload_length].to_vec(),
                })
            }

            // Complete and Error were already folded back into Sync above.
            RxState::Complete | RxState::Error => unreachable!("terminal states reset before use"),
        }
    }
}
