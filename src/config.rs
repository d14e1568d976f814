//! Configuration types for the motor output and RPM filter stack.
//!
//! Everything here is `Copy` and resolved once at init; nothing on the hot
//! path re-reads configuration.

// ── Capacities ────────────────────────────────────────────────────────────────

pub const MAX_SUPPORTED_MOTORS: usize = 8;
pub const MAX_DMA_TIMERS: usize = 8;
pub const RPM_FILTER_MAX_HARMONICS: usize = 3;
pub const XYZ_AXIS_COUNT: usize = 3;

// ── Protocol ──────────────────────────────────────────────────────────────────

/// Ticks per DSHOT bit at the protocol bit clock.
pub const MOTOR_BITLENGTH: u16 = 20;
/// Ticks per Proshot nibble at the protocol bit clock.
pub const MOTOR_NIBBLE_LENGTH_PROSHOT: u32 = 96;
/// Shortest Proshot symbol (nibble value 0), in ticks.
pub const PROSHOT_BASE_SYMBOL: i32 = 24;
/// Ticks added per unit of nibble value.
pub const PROSHOT_BIT_WIDTH: i32 = 3;

/// 16 bits plus two trailing zero slots that hold the line low after the frame.
pub const DSHOT_DMA_BUFFER_SIZE: usize = 18;
/// 4 nibbles plus two trailing zero slots.
pub const PROSHOT_DMA_BUFFER_SIZE: usize = 6;

pub const DSHOT_TELEMETRY_INPUT_LEN: usize = 32;
pub const PROSHOT_TELEMETRY_INPUT_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Dshot150,
    Dshot300,
    Dshot600,
    Dshot1200,
    Proshot1000,
}

impl Protocol {
    pub fn is_proshot(self) -> bool {
        matches!(self, Protocol::Proshot1000)
    }

    /// Timer tick rate the protocol's waveform is built on.
    pub fn bit_clock_hz(self) -> u32 {
        match self {
            Protocol::Dshot150 => 3_000_000,
            Protocol::Dshot300 => 6_000_000,
            Protocol::Dshot600 => 12_000_000,
            Protocol::Dshot1200 | Protocol::Proshot1000 => 24_000_000,
        }
    }

    /// Timer period in ticks; ARR gets `period - 1`.
    pub fn timer_period(self) -> u32 {
        if self.is_proshot() {
            MOTOR_NIBBLE_LENGTH_PROSHOT
        } else {
            MOTOR_BITLENGTH as u32
        }
    }

    /// Prescaler for a timer running at `timer_clock_hz`, rounded to nearest.
    pub fn prescaler(self, timer_clock_hz: u32) -> u16 {
        let hz = self.bit_clock_hz();
        ((timer_clock_hz + hz / 2) / hz).saturating_sub(1) as u16
    }

    pub fn output_buffer_len(self) -> usize {
        if self.is_proshot() {
            PROSHOT_DMA_BUFFER_SIZE
        } else {
            DSHOT_DMA_BUFFER_SIZE
        }
    }

    /// Number of edge timestamps captured for one telemetry reply.
    pub fn telemetry_input_len(self) -> usize {
        if self.is_proshot() {
            PROSHOT_TELEMETRY_INPUT_LEN
        } else {
            DSHOT_TELEMETRY_INPUT_LEN
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaMode {
    /// One DMA stream per motor, fed from the motor's own buffer.
    PerChannel,
    /// One DMA stream per timer writing all four CCRs through DMAR.
    Burst,
}

// ── Motor output ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorConfig {
    pub protocol: Protocol,
    pub pole_count: u8,
    pub use_dshot_telemetry: bool,
    pub dma_mode: DmaMode,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Dshot600,
            pole_count: 14,
            use_dshot_telemetry: true,
            dma_mode: DmaMode::PerChannel,
        }
    }
}

impl MotorConfig {
    /// Burst transfers cannot be turned around per channel, so telemetry
    /// forces per-channel DMA.
    pub fn effective_dma_mode(&self) -> DmaMode {
        if self.use_dshot_telemetry {
            DmaMode::PerChannel
        } else {
            self.dma_mode
        }
    }
}

// ── RPM filter ────────────────────────────────────────────────────────────────

/// Notch bank settings. Q values are stored ×100 (500 = Q 5.0).
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RpmFilterConfig {
    pub gyro_harmonics: u8,
    pub gyro_min_hz: u8,
    pub gyro_q: u16,
    pub dterm_harmonics: u8,
    pub dterm_min_hz: u8,
    pub dterm_q: u16,
}

impl Default for RpmFilterConfig {
    fn default() -> Self {
        Self {
            gyro_harmonics: 3,
            gyro_min_hz: 100,
            gyro_q: 500,
            dterm_harmonics: 1,
            dterm_min_hz: 100,
            dterm_q: 500,
        }
    }
}

/// Gyro sampling period and the PID loop divider applied to it.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoopTiming {
    pub gyro_looptime_us: f32,
    pub pid_process_denom: u8,
}

impl Default for LoopTiming {
    fn default() -> Self {
        // 8 kHz gyro, 4 kHz PID
        Self {
            gyro_looptime_us: 125.0,
            pid_process_denom: 2,
        }
    }
}

impl LoopTiming {
    pub fn pid_looptime_us(&self) -> f32 {
        self.gyro_looptime_us * self.pid_process_denom.max(1) as f32
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    MotorIndexOutOfRange,
    TooManyMotors,
    TooManyTimers,
    TooManyHarmonics,
    /// Gyro loop period is zero, negative or not a number.
    InvalidLoopTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescaler_matches_bit_clock() {
        // 84 MHz APB1 timer clock on the F405
        assert_eq!(Protocol::Dshot600.prescaler(84_000_000), 6);
        assert_eq!(Protocol::Dshot300.prescaler(84_000_000), 13);
        // 168 MHz APB2 timer clock
        assert_eq!(Protocol::Dshot1200.prescaler(168_000_000), 6);
    }

    #[test]
    fn telemetry_forces_per_channel_dma() {
        let mut cfg = MotorConfig {
            dma_mode: DmaMode::Burst,
            ..MotorConfig::default()
        };
        assert_eq!(cfg.effective_dma_mode(), DmaMode::PerChannel);

        cfg.use_dshot_telemetry = false;
        assert_eq!(cfg.effective_dma_mode(), DmaMode::Burst);
    }

    #[test]
    fn pid_looptime_from_denom() {
        let timing = LoopTiming::default();
        assert_eq!(timing.pid_looptime_us(), 250.0);
    }
}
