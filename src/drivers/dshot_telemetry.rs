//! Decoders for the telemetry reply captured on the motor line.
//!
//! Both take the edge timestamps the input-capture DMA wrote, fold them into
//! a 16 bit frame (12 bit value + 4 bit checksum) and verify the checksum.
//! They are pure: the same buffer always decodes to the same result.

use crate::config::{
    DSHOT_TELEMETRY_INPUT_LEN, MOTOR_NIBBLE_LENGTH_PROSHOT, PROSHOT_BASE_SYMBOL,
    PROSHOT_BIT_WIDTH, PROSHOT_TELEMETRY_INPUT_LEN,
};

/// Integer form of a rejected frame, for logging sinks that want one.
pub const INVALID_TELEMETRY: u16 = 0xffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryError {
    Checksum,
}

/// Bidirectional DSHOT: one bit per timestamp pair.
pub fn decode_dshot(buffer: &[u32; DSHOT_TELEMETRY_INPUT_LEN]) -> Result<u16, TelemetryError> {
    let mut value: u32 = 0;
    for i in (1..DSHOT_TELEMETRY_INPUT_LEN).step_by(2) {
        let diff = buffer[i].wrapping_sub(buffer[i - 1]) as i32;
        value <<= 1;
        let one = if diff > 0 { diff >= 11 } else { diff >= -9 };
        if one {
            value |= 1;
        }
    }

    checked_payload(value)
}

/// Proshot: one nibble per timestamp pair, encoded in the pulse length.
pub fn decode_proshot(
    buffer: &[u32; PROSHOT_TELEMETRY_INPUT_LEN],
) -> Result<u16, TelemetryError> {
    let mut value: u32 = 0;
    for i in (1..PROSHOT_TELEMETRY_INPUT_LEN).step_by(2) {
        let symbol = buffer[i]
            .wrapping_add(MOTOR_NIBBLE_LENGTH_PROSHOT)
            .wrapping_sub(buffer[i - 1])
            % MOTOR_NIBBLE_LENGTH_PROSHOT;
        let diff = symbol as i32 - PROSHOT_BASE_SYMBOL;
        let nibble = if diff < 0 {
            0
        } else {
            (diff + PROSHOT_BIT_WIDTH / 2) / PROSHOT_BIT_WIDTH
        };
        value <<= 4;
        value |= (nibble & 0xf) as u32;
    }

    checked_payload(value)
}

/// Xor of all four nibbles must be zero; returns the 12 bit payload.
fn checked_payload(value: u32) -> Result<u16, TelemetryError> {
    let mut csum = value;
    csum ^= csum >> 8;
    csum ^= csum >> 4;

    if csum & 0xf != 0 {
        return Err(TelemetryError::Checksum);
    }
    Ok((value >> 4) as u16)
}
