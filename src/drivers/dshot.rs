use crate::config::{
    Protocol, DSHOT_DMA_BUFFER_SIZE, PROSHOT_BASE_SYMBOL, PROSHOT_BIT_WIDTH,
    PROSHOT_DMA_BUFFER_SIZE,
};

/// Compare value for a DSHOT `1` bit, out of a 20 tick bit.
pub const MOTOR_BIT_1: u32 = 14;
/// Compare value for a DSHOT `0` bit.
pub const MOTOR_BIT_0: u32 = 7;

/// Builds the 16 bit packet for a motor value and expands it into compare
/// values for the DMA buffer.
pub trait Waveform {
    fn packet(&self, value: u16, request_telemetry: bool) -> u16;

    /// Writes the waveform every `stride` slots starting at `buffer[0]` and
    /// returns the number of slots a transfer must move.
    fn load(&self, buffer: &mut [u32], stride: usize, packet: u16) -> usize;
}

/// Special-command source (beacons, spin direction, save settings…).
///
/// Queued commands replace the throttle value and must line up with a live
/// output cycle; the queue decides when that is.
pub trait CommandQueue {
    /// A command is being clocked out in this cycle.
    fn is_processing(&self) -> bool;
    /// Value to send instead of the throttle for `motor`.
    fn command(&self, motor: u8) -> u16;
    /// A command is waiting to start.
    fn is_queued(&self) -> bool;
    /// Whether output may start this cycle while a command is queued.
    fn output_enabled(&self, motor_count: u8) -> bool;
    /// Called once the cycle has been started.
    fn advance(&mut self);
}

/// No special commands, only throttle.
pub struct NoCommands;

impl CommandQueue for NoCommands {
    fn is_processing(&self) -> bool {
        false
    }

    fn command(&self, _motor: u8) -> u16 {
        0
    }

    fn is_queued(&self) -> bool {
        false
    }

    fn output_enabled(&self, _motor_count: u8) -> bool {
        true
    }

    fn advance(&mut self) {}
}

pub struct DshotWaveform {
    protocol: Protocol,
    bidirectional: bool,
}

impl DshotWaveform {
    /// `bidirectional` inverts the checksum, which is how the ESC learns it
    /// has to reply on the signal line.
    pub fn new(protocol: Protocol, bidirectional: bool) -> Self {
        Self {
            protocol,
            bidirectional,
        }
    }
}

impl Waveform for DshotWaveform {
    fn packet(&self, value: u16, request_telemetry: bool) -> u16 {
        dshot_frame(value, request_telemetry, self.bidirectional)
    }

    fn load(&self, buffer: &mut [u32], stride: usize, packet: u16) -> usize {
        if self.protocol.is_proshot() {
            load_proshot(buffer, stride, packet)
        } else {
            load_dshot(buffer, stride, packet)
        }
    }
}

/// 11 bit value, telemetry request bit, 4 bit checksum.
pub fn dshot_frame(command: u16, telemetry: bool, bidirectional: bool) -> u16 {
    let mut packet = (command & 0x07ff) << 1;
    if telemetry {
        packet |= 1;
    }

    let mut csum = 0u16;
    let mut csum_data = packet;
    for _ in 0..3 {
        csum ^= csum_data;
        csum_data >>= 4;
    }
    if bidirectional {
        csum = !csum;
    }
    csum &= 0x000f;

    (packet << 4) | csum
}

fn load_dshot(buffer: &mut [u32], stride: usize, mut packet: u16) -> usize {
    for i in 0..16 {
        // MSB first
        buffer[i * stride] = if packet & 0x8000 != 0 {
            MOTOR_BIT_1
        } else {
            MOTOR_BIT_0
        };
        packet <<= 1;
    }
    buffer[16 * stride] = 0;
    buffer[17 * stride] = 0;

    DSHOT_DMA_BUFFER_SIZE
}

fn load_proshot(buffer: &mut [u32], stride: usize, mut packet: u16) -> usize {
    for i in 0..4 {
        let nibble = ((packet & 0xf000) >> 12) as i32;
        buffer[i * stride] = (PROSHOT_BASE_SYMBOL + nibble * PROSHOT_BIT_WIDTH) as u32;
        packet <<= 4;
    }
    buffer[4 * stride] = 0;
    buffer[5 * stride] = 0;

    PROSHOT_DMA_BUFFER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_checksum() {
        // 1046 with telemetry: 0x82d -> checksum 0x8 ^ 0x2 ^ 0xd = 0x7
        let frame = dshot_frame(1046, true, false);
        assert_eq!(frame, 0x82D7);

        let inverted = dshot_frame(1046, true, true);
        assert_eq!(inverted & 0xfff0, frame & 0xfff0);
        assert_eq!(inverted & 0xf, !frame & 0xf);
    }

    #[test]
    fn dshot_waveform_is_msb_first_and_zero_padded() {
        let wf = DshotWaveform::new(Protocol::Dshot600, false);
        let mut buf = [0xffu32; 18];
        let len = wf.load(&mut buf, 1, 0x8001);

        assert_eq!(len, 18);
        assert_eq!(buf[0], MOTOR_BIT_1);
        assert!(buf[1..15].iter().all(|&v| v == MOTOR_BIT_0));
        assert_eq!(buf[15], MOTOR_BIT_1);
        assert_eq!(&buf[16..], &[0, 0]);
    }

    #[test]
    fn strided_load_leaves_other_channels_alone() {
        let wf = DshotWaveform::new(Protocol::Dshot300, false);
        let mut burst = [0xffu32; 18 * 4];
        wf.load(&mut burst[2..], 4, 0xffff);

        for (i, v) in burst.iter().enumerate() {
            if i >= 2 && (i - 2) % 4 == 0 {
                assert!(*v == MOTOR_BIT_1 || *v == 0);
            } else {
                assert_eq!(*v, 0xff);
            }
        }
    }

    #[test]
    fn proshot_symbols() {
        let wf = DshotWaveform::new(Protocol::Proshot1000, false);
        let mut buf = [0u32; 6];
        let len = wf.load(&mut buf, 1, 0x0f3a);

        assert_eq!(len, 6);
        assert_eq!(&buf[..4], &[24, 24 + 15 * 3, 24 + 3 * 3, 24 + 10 * 3]);
    }
}
