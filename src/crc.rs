use crc::Crc;

/// UAVTalk uses CRC-8/SMBUS as the frame checksum: polynomial 0x07, zero
/// initial value, no reflection, no final XOR. This is the same algorithm the
/// reference firmware generates its lookup table for with pycrc.
pub const UAVTALK_CRC8: Crc<u8> = Crc::<u8>::new(&crc::CRC_8_SMBUS);

/// Computes the checksum of a whole buffer in one go.
pub fn crc8(data: &[u8]) -> u8 {
    UAVTALK_CRC8.checksum(data)
}

/// Folds a single byte into a running checksum.
///
/// The receive state machine sees the stream one byte at a time, so the
/// checksum has to be chainable: `crc8_update(crc8_update(0, a), b)` must
/// equal `crc8(&[a, b])`. That holds for this algorithm because it carries no
/// reflection and no final XOR.
pub fn crc8_update(crc: u8, byte: u8) -> u8 {
    let mut digest = UAVTALK_CRC8.digest_with_initial(crc);
    digest.update(&[byte]);
    digest.finalize()
}

/// Folds a buffer into a running checksum.
pub fn crc8_update_many(crc: u8, data: &[u8]) -> u8 {
    let mut digest = UAVTALK_CRC8.digest_with_initial(crc);
    digest.update(data);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::{crc8, crc8_update, crc8_update_many};

    #[test]
    fn check_vector() {
        // The standard CRC-8/SMBUS check value.
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(crc8(&[]), 0x00);
    }

    #[test]
    fn byte_chaining_matches_buffer() {
        let data = [0x3C, 0x21, 0x0A, 0x00, 0xFF, 0x80, 0x7F, 0x01];
        let folded = data.iter().fold(0u8, |crc, &b| crc8_update(crc, b));
        assert_eq!(folded, crc8(&data));
        assert_eq!(crc8_update_many(0, &data), crc8(&data));
    }

    #[test]
    fn deterministic() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(crc8(&data), crc8(&data));
    }
}
