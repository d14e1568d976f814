//! Notch filters that follow the motors' rotation speed.
//!
//! Each bank holds one notch per (axis, motor, harmonic). Retuning is spread
//! over consecutive loop ticks: a cursor walks the (motor, bank, harmonic)
//! space and retunes a fixed number of notches per tick, so that every notch
//! is refreshed at least once per [`MIN_UPDATE_T`] seconds.

use heapless::Vec;
use micromath::F32Ext;

use crate::config::{
    ConfigError, LoopTiming, MotorConfig, RpmFilterConfig, MAX_SUPPORTED_MOTORS,
    RPM_FILTER_MAX_HARMONICS, XYZ_AXIS_COUNT,
};
use crate::drivers::filter::{pt1_gain, BiquadCoefficients, BiquadFilter, Pt1Filter};

const RPM_MOTOR_FILTER_CUTOFF_HZ: f32 = 150.0;
/// Longest time any notch may go without a retune, in seconds.
pub const MIN_UPDATE_T: f32 = 0.001;
const ERPM_PER_LSB: f32 = 100.0;
const SECONDS_PER_MINUTE: f32 = 60.0;
/// Where notches for a stopped or slow motor are parked. Also the ceiling.
pub const DEACTIVATE_FREQ_HZ: f32 = 1000.0;

/// Notch center for a harmonic at `frequency`, kept inside
/// `[min_hz, DEACTIVATE_FREQ_HZ]`. Anything under half of `min_hz` is parked.
pub fn clamp_notch_frequency(frequency: f32, min_hz: f32) -> f32 {
    let mut frequency = frequency;
    if frequency < min_hz {
        frequency = if frequency < 0.5 * min_hz {
            DEACTIVATE_FREQ_HZ
        } else {
            min_hz
        };
    }
    if frequency > DEACTIVATE_FREQ_HZ {
        frequency = DEACTIVATE_FREQ_HZ;
    }
    frequency
}

pub struct RpmNotchFilter<const M: usize> {
    harmonics: usize,
    min_hz: f32,
    q: f32,
    loop_time_us: f32,
    notch: [[[BiquadFilter; RPM_FILTER_MAX_HARMONICS]; M]; XYZ_AXIS_COUNT],
}

impl<const M: usize> RpmNotchFilter<M> {
    fn new(harmonics: usize, min_hz: u8, q: u16, loop_time_us: f32, motor_count: usize) -> Self {
        let min_hz = min_hz as f32;
        let q = q as f32 / 100.0;

        let mut notch = [[[BiquadFilter::default(); RPM_FILTER_MAX_HARMONICS]; M]; XYZ_AXIS_COUNT];
        for axis in notch.iter_mut() {
            for motor in axis.iter_mut().take(motor_count) {
                for (i, filter) in motor.iter_mut().take(harmonics).enumerate() {
                    *filter = BiquadFilter::new_notch(min_hz * i as f32, loop_time_us, q);
                }
            }
        }

        Self {
            harmonics,
            min_hz,
            q,
            loop_time_us,
            notch,
        }
    }

    fn apply(&mut self, axis: usize, motor_count: usize, mut value: f32) -> f32 {
        let Some(axis) = self.notch.get_mut(axis) else {
            return value;
        };
        for motor in axis.iter_mut().take(motor_count) {
            for filter in motor.iter_mut().take(self.harmonics) {
                value = filter.filter(value);
            }
        }
        value
    }

    /// Retunes axis 0 and copies its coefficients to the other axes.
    fn retune(&mut self, motor: usize, harmonic: usize, frequency: f32) {
        let [template_axis, other_axes @ ..] = &mut self.notch;
        let template = &mut template_axis[motor][harmonic];
        template.update_notch(frequency, self.loop_time_us, self.q);

        let coeffs = template.coefficients();
        for axis in other_axes.iter_mut() {
            axis[motor][harmonic].set_coefficients(coeffs);
        }
    }

    pub fn harmonics(&self) -> usize {
        self.harmonics
    }

    pub fn min_hz(&self) -> f32 {
        self.min_hz
    }

    pub fn coefficients(
        &self,
        axis: usize,
        motor: usize,
        harmonic: usize,
    ) -> Option<BiquadCoefficients> {
        self.notch
            .get(axis)?
            .get(motor)?
            .get(harmonic)
            .map(BiquadFilter::coefficients)
    }
}

/// Next notch the scheduler retunes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateCursor {
    pub motor: usize,
    pub bank: usize,
    pub harmonic: usize,
}

pub struct RpmFilter<const M: usize = MAX_SUPPORTED_MOTORS> {
    banks: Vec<RpmNotchFilter<M>, 2>,
    gyro: Option<usize>,
    dterm: Option<usize>,
    motor_count: usize,
    erpm_to_hz: f32,
    erpm_lpf: [Pt1Filter; M],
    filtered_erpm: [f32; M],
    motor_frequency: [f32; M],
    cursor: UpdateCursor,
    updates_per_tick: usize,
    total_notches: usize,
}

impl<const M: usize> RpmFilter<M> {
    /// Builds both banks. With DSHOT telemetry off there is nothing to track
    /// and both stay disabled.
    pub fn new(
        config: &RpmFilterConfig,
        motor: &MotorConfig,
        timing: LoopTiming,
        motor_count: usize,
    ) -> Result<Self, ConfigError> {
        if motor_count > M {
            return Err(ConfigError::TooManyMotors);
        }
        let gyro_harmonics = config.gyro_harmonics as usize;
        let dterm_harmonics = config.dterm_harmonics as usize;
        if gyro_harmonics > RPM_FILTER_MAX_HARMONICS || dterm_harmonics > RPM_FILTER_MAX_HARMONICS {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "rpm filter: {}/{} harmonics, max {}",
                gyro_harmonics,
                dterm_harmonics,
                RPM_FILTER_MAX_HARMONICS
            );
            return Err(ConfigError::TooManyHarmonics);
        }

        if !(timing.gyro_looptime_us > 0.0) {
            #[cfg(feature = "defmt")]
            defmt::warn!("rpm filter: gyro looptime {} us", timing.gyro_looptime_us);
            return Err(ConfigError::InvalidLoopTime);
        }

        let pid_looptime_us = timing.pid_looptime_us();
        let mut filter = Self {
            banks: Vec::new(),
            gyro: None,
            dterm: None,
            motor_count,
            erpm_to_hz: ERPM_PER_LSB / SECONDS_PER_MINUTE / (motor.pole_count.max(2) as f32 / 2.0),
            erpm_lpf: [Pt1Filter::new(pt1_gain(
                RPM_MOTOR_FILTER_CUTOFF_HZ,
                pid_looptime_us * 1e-6,
            )); M],
            filtered_erpm: [0.0; M],
            motor_frequency: [0.0; M],
            cursor: UpdateCursor::default(),
            updates_per_tick: 0,
            total_notches: 0,
        };

        if !motor.use_dshot_telemetry || motor_count == 0 {
            #[cfg(feature = "defmt")]
            defmt::info!("rpm filter disabled");
            return Ok(filter);
        }

        if gyro_harmonics > 0 {
            filter.gyro = Some(filter.banks.len());
            filter.push_bank(RpmNotchFilter::new(
                gyro_harmonics,
                config.gyro_min_hz,
                config.gyro_q,
                timing.gyro_looptime_us,
                motor_count,
            ));
        }
        if dterm_harmonics > 0 {
            filter.dterm = Some(filter.banks.len());
            filter.push_bank(RpmNotchFilter::new(
                dterm_harmonics,
                config.dterm_min_hz,
                config.dterm_q,
                pid_looptime_us,
                motor_count,
            ));
        }

        filter.total_notches = motor_count * (gyro_harmonics + dterm_harmonics);
        let loop_iterations_per_update = MIN_UPDATE_T / (pid_looptime_us * 1e-6);
        let per_tick = filter.total_notches as f32 / loop_iterations_per_update;
        filter.updates_per_tick = ((per_tick + 0.49).round() as usize).max(1);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "rpm filter: {} notches, {} per tick",
            filter.total_notches,
            filter.updates_per_tick
        );
        Ok(filter)
    }

    fn push_bank(&mut self, bank: RpmNotchFilter<M>) {
        // at most two banks, both fit
        let _ = self.banks.push(bank);
    }

    /// One loop tick: smooth every motor's telemetry, then retune the next
    /// batch of notches. `telemetry` returns a motor's last eRPM / 100.
    pub fn update(&mut self, telemetry: impl Fn(u8) -> u16) {
        if self.banks.is_empty() {
            return;
        }

        for motor in 0..self.motor_count {
            let erpm = telemetry(motor as u8) as f32;
            self.filtered_erpm[motor] = self.erpm_lpf[motor].filter(erpm);
        }

        for _ in 0..self.updates_per_tick {
            let UpdateCursor {
                motor,
                bank,
                harmonic,
            } = self.cursor;
            let notch = &mut self.banks[bank];
            let frequency = clamp_notch_frequency(
                (harmonic + 1) as f32 * self.motor_frequency[motor],
                notch.min_hz,
            );
            notch.retune(motor, harmonic, frequency);
            self.advance();
        }
    }

    fn advance(&mut self) {
        let cursor = &mut self.cursor;
        cursor.harmonic += 1;
        if cursor.harmonic < self.banks[cursor.bank].harmonics {
            return;
        }
        cursor.harmonic = 0;
        cursor.bank += 1;
        if cursor.bank < self.banks.len() {
            return;
        }
        cursor.bank = 0;
        cursor.motor += 1;
        if cursor.motor == self.motor_count {
            cursor.motor = 0;
        }
        self.motor_frequency[cursor.motor] = self.erpm_to_hz * self.filtered_erpm[cursor.motor];
    }

    pub fn gyro(&mut self, axis: usize, value: f32) -> f32 {
        let motor_count = self.motor_count;
        match self.gyro {
            Some(bank) => self.banks[bank].apply(axis, motor_count, value),
            None => value,
        }
    }

    pub fn dterm(&mut self, axis: usize, value: f32) -> f32 {
        let motor_count = self.motor_count;
        match self.dterm {
            Some(bank) => self.banks[bank].apply(axis, motor_count, value),
            None => value,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.banks.is_empty()
    }

    pub fn updates_per_iteration(&self) -> usize {
        self.updates_per_tick
    }

    pub fn total_notches(&self) -> usize {
        self.total_notches
    }

    pub fn cursor(&self) -> UpdateCursor {
        self.cursor
    }

    /// Fundamental the notches of `motor` are currently tuned from, in Hz.
    pub fn motor_frequency(&self, motor: usize) -> f32 {
        self.motor_frequency.get(motor).copied().unwrap_or(0.0)
    }

    pub fn filtered_erpm(&self, motor: usize) -> f32 {
        self.filtered_erpm.get(motor).copied().unwrap_or(0.0)
    }

    pub fn gyro_bank(&self) -> Option<&RpmNotchFilter<M>> {
        self.gyro.map(|i| &self.banks[i])
    }

    pub fn dterm_bank(&self) -> Option<&RpmNotchFilter<M>> {
        self.dterm.map(|i| &self.banks[i])
    }
}
