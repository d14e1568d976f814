//! Diagnostic state shared between the motor loop, the transfer-complete
//! handler and whatever logs it.
//!
//! Each counter has a single writer context; readers only ever load.

use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use crate::config::DSHOT_TELEMETRY_INPUT_LEN;

/// Number of motors mirrored into the per-motor debug slots.
pub const DEBUG_MOTOR_SLOTS: usize = 4;

pub struct DshotDebug {
    /// Receive completions seen by the interrupt handler.
    pub read_done: AtomicU32,
    /// Telemetry replies rejected by the checksum.
    pub invalid_packets: AtomicU32,
    /// Edge timestamps of motor 0's last rejected reply.
    pub invalid_capture: [AtomicU32; DSHOT_TELEMETRY_INPUT_LEN],
    /// Duration of the last output→input turnaround, in µs.
    pub set_direction_us: AtomicU32,
    /// Last decoded telemetry value of the first motors.
    pub rpm_telemetry: [AtomicU16; DEBUG_MOTOR_SLOTS],
}

impl DshotDebug {
    pub const fn new() -> Self {
        Self {
            read_done: AtomicU32::new(0),
            invalid_packets: AtomicU32::new(0),
            invalid_capture: [const { AtomicU32::new(0) }; DSHOT_TELEMETRY_INPUT_LEN],
            set_direction_us: AtomicU32::new(0),
            rpm_telemetry: [
                AtomicU16::new(0),
                AtomicU16::new(0),
                AtomicU16::new(0),
                AtomicU16::new(0),
            ],
        }
    }

    pub fn record_invalid_capture(&self, capture: &[u32]) {
        for (dst, src) in self.invalid_capture.iter().zip(capture) {
            dst.store(*src, Ordering::Relaxed);
        }
    }

    pub fn last_invalid_capture(&self) -> [u32; DSHOT_TELEMETRY_INPUT_LEN] {
        let mut capture = [0u32; DSHOT_TELEMETRY_INPUT_LEN];
        for (dst, src) in capture.iter_mut().zip(self.invalid_capture.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }
        capture
    }

    pub fn snapshot(&self) -> DshotDebugSnapshot {
        let mut rpm_telemetry = [0u16; DEBUG_MOTOR_SLOTS];
        for (dst, src) in rpm_telemetry.iter_mut().zip(self.rpm_telemetry.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }
        DshotDebugSnapshot {
            read_done: self.read_done.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            set_direction_us: self.set_direction_us.load(Ordering::Relaxed),
            rpm_telemetry,
        }
    }
}

impl Default for DshotDebug {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of [`DshotDebug`] for logging sinks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DshotDebugSnapshot {
    pub read_done: u32,
    pub invalid_packets: u32,
    pub set_direction_us: u32,
    pub rpm_telemetry: [u16; DEBUG_MOTOR_SLOTS],
}
