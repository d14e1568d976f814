//! DSHOT motor output over timer/DMA, with bidirectional telemetry capture.
//!
//! One [`DshotOutput`] owns every motor channel and the timer groups they
//! share. The motor loop drives a cycle as
//!
//! 1. [`DshotOutput::start_update`]: consume captured telemetry, turn every
//!    channel back into an output,
//! 2. [`DshotOutput::transmit`] for each motor: load the waveform, arm DMA,
//! 3. [`DshotOutput::complete_update`]: start all timer groups at once,
//!
//! while the transfer-complete interrupt calls
//! [`DshotOutput::on_transfer_complete`] for the motor whose stream finished.
//!
//! Fields written from the interrupt are atomics with the interrupt as their
//! only writer, and vice versa for the loop-side fields. No locks.

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use heapless::Vec;

use crate::config::{
    ConfigError, DmaMode, MotorConfig, DSHOT_DMA_BUFFER_SIZE, DSHOT_TELEMETRY_INPUT_LEN,
    MAX_DMA_TIMERS, MAX_SUPPORTED_MOTORS, PROSHOT_TELEMETRY_INPUT_LEN,
};
use crate::drivers::dshot::{CommandQueue, Waveform};
use crate::drivers::dshot_telemetry::{decode_dshot, decode_proshot, TelemetryError};
use crate::drivers::motor_hw::{
    Direction, DmaBuffer, DmaSources, MotorHardware, MotorPin, TimerChannel, TimerId,
};
use crate::state::DshotDebug;

/// Burst transfers interleave the four CCR values of a timer.
const BURST_STRIDE: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    Transmitting,
    Receiving,
}

#[derive(Clone, Copy)]
struct ChannelBinding {
    pin: MotorPin,
    group: usize,
    dma_source: DmaSources,
}

pub struct MotorChannel {
    index: u8,
    // Written once by configure_motor, before any transfer runs.
    binding: Option<ChannelBinding>,
    configured: AtomicBool,
    is_input: AtomicBool,
    has_telemetry: AtomicBool,
    request_telemetry: AtomicBool,
    value: AtomicU16,
    telemetry_value: AtomicU16,
    output: DmaBuffer<DSHOT_DMA_BUFFER_SIZE>,
    input: DmaBuffer<DSHOT_TELEMETRY_INPUT_LEN>,
}

impl MotorChannel {
    fn new(index: u8) -> Self {
        Self {
            index,
            binding: None,
            configured: AtomicBool::new(false),
            is_input: AtomicBool::new(false),
            has_telemetry: AtomicBool::new(false),
            request_telemetry: AtomicBool::new(false),
            value: AtomicU16::new(0),
            telemetry_value: AtomicU16::new(0),
            output: DmaBuffer::new(),
            input: DmaBuffer::new(),
        }
    }

    fn bound(&self) -> Option<&ChannelBinding> {
        if self.configured.load(Ordering::Acquire) {
            self.binding.as_ref()
        } else {
            None
        }
    }
}

/// Motor channels sharing one physical timer.
pub struct TimerGroup {
    timer: TimerId,
    /// CCxDE bits of the channels loaded this cycle.
    dma_sources: AtomicU16,
    burst: DmaBuffer<{ DSHOT_DMA_BUFFER_SIZE * BURST_STRIDE }>,
    burst_len: AtomicU16,
}

impl TimerGroup {
    fn new(timer: TimerId) -> Self {
        Self {
            timer,
            dma_sources: AtomicU16::new(0),
            burst: DmaBuffer::new(),
            burst_len: AtomicU16::new(0),
        }
    }

    pub fn timer(&self) -> TimerId {
        self.timer
    }

    pub fn pending_sources(&self) -> DmaSources {
        DmaSources(self.dma_sources.load(Ordering::Relaxed))
    }
}

pub struct DshotOutput<H, W, const N: usize = MAX_SUPPORTED_MOTORS> {
    hw: H,
    waveform: W,
    config: MotorConfig,
    dma_mode: DmaMode,
    channels: [MotorChannel; N],
    groups: Vec<TimerGroup, MAX_DMA_TIMERS>,
    debug: DshotDebug,
}

impl<H: MotorHardware, W: Waveform, const N: usize> DshotOutput<H, W, N> {
    pub fn new(hw: H, waveform: W, config: MotorConfig) -> Self {
        Self {
            hw,
            waveform,
            config,
            dma_mode: config.effective_dma_mode(),
            channels: core::array::from_fn(|i| MotorChannel::new(i as u8)),
            groups: Vec::new(),
            debug: DshotDebug::new(),
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    /// Binds motor `index` to its timer channel and leaves it ready to
    /// transmit. The first motor on a timer brings up that timer.
    pub fn configure_motor(&mut self, index: u8, pin: MotorPin) -> Result<(), ConfigError> {
        let idx = index as usize;
        if idx >= N {
            #[cfg(feature = "defmt")]
            defmt::warn!("motor {} out of range ({} channels)", index, N);
            return Err(ConfigError::MotorIndexOutOfRange);
        }

        let (group, new_timer) = self.timer_index(pin.timer)?;
        if new_timer {
            self.hw.init_timer(pin.timer, self.config.protocol);
            #[cfg(feature = "defmt")]
            defmt::info!("TIM{} registered as group {}", pin.timer.0, group);
        }

        let binding = ChannelBinding {
            pin,
            group,
            dma_source: pin.channel.dma_source(),
        };

        match self.dma_mode {
            DmaMode::Burst => {
                if new_timer {
                    let buffer = self.groups[group].burst.as_mut_ptr();
                    self.hw.configure_burst_dma(pin.timer, buffer);
                }
                self.hw.set_channel_mode(&pin, Direction::Output);
            }
            DmaMode::PerChannel => {
                self.groups[group]
                    .dma_sources
                    .fetch_and(!binding.dma_source.bits(), Ordering::Relaxed);
                self.set_direction(&self.channels[idx], &binding, Direction::Output);
            }
        }
        self.hw.enable_channel_output(&pin);

        let channel = &mut self.channels[idx];
        channel.binding = Some(binding);
        channel.configured.store(true, Ordering::Release);

        #[cfg(feature = "defmt")]
        defmt::debug!("motor {} on TIM{} {}", index, pin.timer.0, pin.channel);
        Ok(())
    }

    /// Group slot for `timer`, registering it on first use.
    fn timer_index(&mut self, timer: TimerId) -> Result<(usize, bool), ConfigError> {
        if let Some(i) = self.groups.iter().position(|g| g.timer == timer) {
            return Ok((i, false));
        }
        if self.groups.push(TimerGroup::new(timer)).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("no timer group left for TIM{}", timer.0);
            return Err(ConfigError::TooManyTimers);
        }
        Ok((self.groups.len() - 1, true))
    }

    fn set_direction(&self, channel: &MotorChannel, binding: &ChannelBinding, dir: Direction) {
        channel
            .is_input
            .store(dir == Direction::Input, Ordering::Release);
        self.hw.set_channel_mode(&binding.pin, dir);
        let buffer = match dir {
            Direction::Output => channel.output.as_mut_ptr(),
            Direction::Input => channel.input.as_mut_ptr(),
        };
        self.hw.configure_dma(channel.index, dir, buffer);
    }

    // ── Motor loop ────────────────────────────────────────────────────────────

    /// Collects last cycle's telemetry and turns every channel back into an
    /// output. Does nothing when telemetry is off.
    pub fn start_update(&self, motor_count: u8) {
        if !self.config.use_dshot_telemetry {
            return;
        }
        let count = (motor_count as usize).min(N);

        for channel in &self.channels[..count] {
            let Some(binding) = channel.bound() else {
                continue;
            };
            if channel.has_telemetry.load(Ordering::Acquire) {
                self.consume_telemetry(channel);
                channel.has_telemetry.store(false, Ordering::Release);
            } else {
                self.hw
                    .timer_dma_disable(binding.pin.timer, binding.dma_source);
            }
            self.set_direction(channel, binding, Direction::Output);
        }

        // The output enable is lost while the channel captures.
        for channel in &self.channels[..count] {
            if let Some(binding) = channel.bound() {
                self.hw.enable_channel_output(&binding.pin);
            }
        }
    }

    fn consume_telemetry(&self, channel: &MotorChannel) {
        // SAFETY: has_telemetry is only set after the input stream was
        // stopped, and nothing restarts it before set_direction(Output).
        let input = unsafe { channel.input.as_ref() };
        let decoded = if self.config.protocol.is_proshot() {
            match input.first_chunk::<PROSHOT_TELEMETRY_INPUT_LEN>() {
                Some(edges) => decode_proshot(edges),
                None => Err(TelemetryError::Checksum),
            }
        } else {
            decode_dshot(input)
        };

        match decoded {
            Ok(value) => {
                channel.telemetry_value.store(value, Ordering::Relaxed);
                if let Some(slot) = self.debug.rpm_telemetry.get(channel.index as usize) {
                    slot.store(value, Ordering::Relaxed);
                }
            }
            Err(_e) => {
                self.debug.invalid_packets.fetch_add(1, Ordering::Relaxed);
                if channel.index == 0 {
                    let capture_len = self.config.protocol.telemetry_input_len();
                    self.debug.record_invalid_capture(&input[..capture_len]);
                }
                #[cfg(feature = "defmt")]
                defmt::trace!("motor {} telemetry {}", channel.index, _e);
            }
        }
    }

    /// Asks motor `index`'s ESC to reply to the next frame. Cleared once that
    /// frame is loaded.
    pub fn request_telemetry(&self, index: u8) {
        if let Some(channel) = self.channels.get(index as usize) {
            channel.request_telemetry.store(true, Ordering::Relaxed);
        }
    }

    /// Loads `value` (or the queued command) into motor `index`'s waveform
    /// buffer and arms its DMA. Nothing moves until [`Self::complete_update`].
    pub fn transmit(&self, index: u8, value: u16, commands: &impl CommandQueue) {
        let Some(channel) = self.channels.get(index as usize) else {
            return;
        };
        let Some(binding) = channel.bound() else {
            return;
        };

        let mut value = value;
        if commands.is_processing() {
            value = commands.command(index);
            if value != 0 {
                channel.request_telemetry.store(true, Ordering::Relaxed);
            }
        }
        channel.value.store(value, Ordering::Relaxed);

        // one-shot request
        let request = channel.request_telemetry.swap(false, Ordering::Relaxed);
        let packet = self.waveform.packet(value, request);
        let group = &self.groups[binding.group];

        match self.dma_mode {
            DmaMode::Burst => {
                // SAFETY: the burst stream of this timer is idle until
                // complete_update starts it.
                let burst = unsafe { group.burst.as_mut() };
                let offset = binding.pin.channel.index();
                let len = self.waveform.load(&mut burst[offset..], BURST_STRIDE, packet);
                group
                    .burst_len
                    .store((len * BURST_STRIDE) as u16, Ordering::Relaxed);
            }
            DmaMode::PerChannel => {
                // SAFETY: the previous output transfer completed and the
                // stream is disabled.
                let buffer = unsafe { channel.output.as_mut() };
                let len = self.waveform.load(buffer, 1, packet);
                group
                    .dma_sources
                    .fetch_or(binding.dma_source.bits(), Ordering::Relaxed);
                self.hw.dma_start(index, len);
            }
        }
    }

    /// Starts every timer group loaded this cycle. Channels sharing a timer
    /// get their DMA requests enabled in a single write.
    pub fn complete_update(&self, motor_count: u8, commands: &mut impl CommandQueue) {
        if commands.is_queued() && !commands.output_enabled(motor_count) {
            return;
        }

        for group in &self.groups {
            match self.dma_mode {
                DmaMode::Burst => {
                    let len = group.burst_len.load(Ordering::Relaxed) as usize;
                    self.hw.burst_start(group.timer, len);
                    self.hw.timer_dma_enable(group.timer, DmaSources::UPDATE);
                }
                DmaMode::PerChannel => {
                    self.hw.reset_counter(group.timer);
                    let sources = DmaSources(group.dma_sources.swap(0, Ordering::AcqRel));
                    if !sources.is_empty() {
                        self.hw.timer_dma_enable(group.timer, sources);
                    }
                }
            }
        }

        commands.advance();
    }

    // ── Interrupt ─────────────────────────────────────────────────────────────

    /// Transfer-complete handler for motor `index`'s DMA stream.
    ///
    /// A finished capture is flagged for [`Self::start_update`]. A finished
    /// output is turned around into a capture when telemetry is on.
    pub fn on_transfer_complete(&self, index: u8) {
        let Some(channel) = self.channels.get(index as usize) else {
            return;
        };
        let Some(binding) = channel.bound() else {
            return;
        };
        let timer = binding.pin.timer;

        if channel.is_input.load(Ordering::Acquire) {
            channel.has_telemetry.store(true, Ordering::Release);
            self.hw.dma_stop(index);
            self.hw.timer_dma_disable(timer, binding.dma_source);
            self.debug.read_done.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let started = self.hw.micros();
        match self.dma_mode {
            DmaMode::Burst => {
                self.hw.burst_stop(timer);
                self.hw.timer_dma_disable(timer, DmaSources::UPDATE);
            }
            DmaMode::PerChannel => {
                self.hw.dma_stop(index);
                self.hw.timer_dma_disable(timer, binding.dma_source);
            }
        }

        if self.config.use_dshot_telemetry {
            self.set_direction(channel, binding, Direction::Input);
            self.hw
                .dma_start(index, self.config.protocol.telemetry_input_len());
            self.hw.timer_dma_enable(timer, binding.dma_source);
            self.debug
                .set_direction_us
                .store(self.hw.micros().wrapping_sub(started), Ordering::Relaxed);
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Last valid telemetry value of motor `index` (eRPM / 100), 0 before the
    /// first one arrives.
    pub fn telemetry(&self, index: u8) -> u16 {
        self.channels
            .get(index as usize)
            .map_or(0, |c| c.telemetry_value.load(Ordering::Relaxed))
    }

    pub fn has_telemetry(&self, index: u8) -> bool {
        self.channels
            .get(index as usize)
            .is_some_and(|c| c.has_telemetry.load(Ordering::Acquire))
    }

    pub fn channel_state(&self, index: u8) -> Option<ChannelState> {
        let channel = self.channels.get(index as usize)?;
        Some(if channel.is_input.load(Ordering::Acquire) {
            ChannelState::Receiving
        } else {
            ChannelState::Transmitting
        })
    }

    pub fn is_configured(&self, index: u8) -> bool {
        self.channels
            .get(index as usize)
            .is_some_and(|c| c.configured.load(Ordering::Acquire))
    }

    /// Value sent to motor `index` in the last cycle.
    pub fn value(&self, index: u8) -> u16 {
        self.channels
            .get(index as usize)
            .map_or(0, |c| c.value.load(Ordering::Relaxed))
    }

    /// Timer channel motor `index` is bound to.
    pub fn binding(&self, index: u8) -> Option<(TimerId, TimerChannel)> {
        let binding = self.channels.get(index as usize)?.bound()?;
        Some((binding.pin.timer, binding.pin.channel))
    }

    pub fn timer_groups(&self) -> &[TimerGroup] {
        &self.groups
    }

    pub fn debug(&self) -> &DshotDebug {
        &self.debug
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    pub fn dma_mode(&self) -> DmaMode {
        self.dma_mode
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    use super::*;
    use crate::config::Protocol;
    use crate::drivers::dshot::{DshotWaveform, NoCommands};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        InitTimer(u8),
        Mode(u8, Direction),
        Dma(u8, Direction),
        DmaStart(u8, usize),
        DmaStop(u8),
        Enable(u8, usize),
        TimerDmaOn(u8, u16),
        TimerDmaOff(u8, u16),
        ResetCounter(u8),
        BurstConfig(u8),
        BurstStart(u8, usize),
        BurstStop(u8),
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<Call>>,
        now: Cell<u32>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Call> {
            core::mem::take(&mut *self.calls.borrow_mut())
        }

        fn push(&self, call: Call) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl MotorHardware for Recorder {
        fn init_timer(&self, timer: TimerId, _protocol: Protocol) {
            self.push(Call::InitTimer(timer.0));
        }
        fn set_channel_mode(&self, pin: &MotorPin, direction: Direction) {
            self.push(Call::Mode(pin.timer.0, direction));
        }
        fn configure_dma(&self, motor: u8, direction: Direction, _buffer: *mut u32) {
            self.push(Call::Dma(motor, direction));
        }
        fn dma_start(&self, motor: u8, len: usize) {
            self.push(Call::DmaStart(motor, len));
        }
        fn dma_stop(&self, motor: u8) {
            self.push(Call::DmaStop(motor));
        }
        fn enable_channel_output(&self, pin: &MotorPin) {
            self.push(Call::Enable(pin.timer.0, pin.channel.index()));
        }
        fn timer_dma_enable(&self, timer: TimerId, sources: DmaSources) {
            self.push(Call::TimerDmaOn(timer.0, sources.bits()));
        }
        fn timer_dma_disable(&self, timer: TimerId, sources: DmaSources) {
            self.push(Call::TimerDmaOff(timer.0, sources.bits()));
        }
        fn reset_counter(&self, timer: TimerId) {
            self.push(Call::ResetCounter(timer.0));
        }
        fn configure_burst_dma(&self, timer: TimerId, _buffer: *mut u32) {
            self.push(Call::BurstConfig(timer.0));
        }
        fn burst_start(&self, timer: TimerId, len: usize) {
            self.push(Call::BurstStart(timer.0, len));
        }
        fn burst_stop(&self, timer: TimerId) {
            self.push(Call::BurstStop(timer.0));
        }
        fn micros(&self) -> u32 {
            let t = self.now.get();
            self.now.set(t + 3);
            t
        }
    }

    fn pin(timer: u8, channel: TimerChannel) -> MotorPin {
        MotorPin {
            timer: TimerId(timer),
            channel,
            complementary: false,
            inverted: false,
        }
    }

    fn output(config: MotorConfig) -> DshotOutput<Recorder, DshotWaveform, 4> {
        let waveform = DshotWaveform::new(config.protocol, config.use_dshot_telemetry);
        DshotOutput::new(Recorder::default(), waveform, config)
    }

    struct OneCommand {
        processing: bool,
        queued: bool,
        enabled: bool,
        advanced: u32,
    }

    impl CommandQueue for OneCommand {
        fn is_processing(&self) -> bool {
            self.processing
        }
        fn command(&self, _motor: u8) -> u16 {
            21
        }
        fn is_queued(&self) -> bool {
            self.queued
        }
        fn output_enabled(&self, _motor_count: u8) -> bool {
            self.enabled
        }
        fn advance(&mut self) {
            self.advanced += 1;
        }
    }

    #[test]
    fn timer_registered_once_per_identity() {
        let mut dshot = output(MotorConfig::default());
        dshot.configure_motor(0, pin(3, TimerChannel::Ch3)).unwrap();
        dshot.configure_motor(1, pin(3, TimerChannel::Ch4)).unwrap();
        dshot.configure_motor(2, pin(2, TimerChannel::Ch4)).unwrap();

        let inits: Vec<_> = dshot
            .hardware()
            .take()
            .into_iter()
            .filter(|c| matches!(c, Call::InitTimer(_)))
            .collect();
        assert_eq!(inits, [Call::InitTimer(3), Call::InitTimer(2)]);
        assert_eq!(dshot.timer_groups().len(), 2);
        assert_eq!(dshot.binding(1), Some((TimerId(3), TimerChannel::Ch4)));
    }

    #[test]
    fn out_of_range_motor_rejected() {
        let mut dshot = output(MotorConfig::default());
        assert_eq!(
            dshot.configure_motor(4, pin(3, TimerChannel::Ch1)),
            Err(ConfigError::MotorIndexOutOfRange)
        );
    }

    #[test]
    fn too_many_timers_rejected() {
        let mut dshot: DshotOutput<Recorder, DshotWaveform, 16> = DshotOutput::new(
            Recorder::default(),
            DshotWaveform::new(Protocol::Dshot600, true),
            MotorConfig::default(),
        );
        for i in 0..MAX_DMA_TIMERS as u8 {
            dshot.configure_motor(i, pin(i + 1, TimerChannel::Ch1)).unwrap();
        }
        assert_eq!(
            dshot.configure_motor(8, pin(20, TimerChannel::Ch1)),
            Err(ConfigError::TooManyTimers)
        );
        assert!(!dshot.is_configured(8));
    }

    #[test]
    fn unconfigured_channel_is_a_no_op() {
        let dshot = output(MotorConfig::default());
        dshot.transmit(1, 500, &NoCommands);
        dshot.on_transfer_complete(1);
        dshot.start_update(4);
        dshot.complete_update(4, &mut NoCommands);

        assert!(dshot.hardware().take().is_empty());
        assert_eq!(dshot.value(1), 0);
    }

    #[test]
    fn group_armed_with_one_enable() {
        let mut dshot = output(MotorConfig::default());
        dshot.configure_motor(0, pin(3, TimerChannel::Ch3)).unwrap();
        dshot.configure_motor(1, pin(3, TimerChannel::Ch4)).unwrap();
        dshot.hardware().take();

        dshot.transmit(0, 300, &NoCommands);
        dshot.transmit(1, 400, &NoCommands);
        dshot.complete_update(2, &mut NoCommands);

        let enables: Vec<_> = dshot
            .hardware()
            .take()
            .into_iter()
            .filter(|c| matches!(c, Call::TimerDmaOn(..)))
            .collect();
        let both = TimerChannel::Ch3.dma_source() | TimerChannel::Ch4.dma_source();
        assert_eq!(enables, [Call::TimerDmaOn(3, both.bits())]);
        assert!(dshot.timer_groups()[0].pending_sources().is_empty());
    }

    #[test]
    fn direction_switch_cycle() {
        let mut dshot = output(MotorConfig::default());
        dshot.configure_motor(0, pin(3, TimerChannel::Ch3)).unwrap();
        dshot.hardware().take();

        dshot.start_update(1);
        dshot.transmit(0, 1000, &NoCommands);
        dshot.complete_update(1, &mut NoCommands);
        assert_eq!(dshot.channel_state(0), Some(ChannelState::Transmitting));

        // output done, line turned around
        dshot.on_transfer_complete(0);
        assert_eq!(dshot.channel_state(0), Some(ChannelState::Receiving));
        assert!(!dshot.has_telemetry(0));
        let calls = dshot.hardware().take();
        assert!(calls.contains(&Call::Dma(0, Direction::Input)));
        assert!(calls.contains(&Call::DmaStart(0, DSHOT_TELEMETRY_INPUT_LEN)));
        assert_eq!(dshot.debug().snapshot().set_direction_us, 3);

        // capture done
        dshot.on_transfer_complete(0);
        assert!(dshot.has_telemetry(0));
        assert_eq!(dshot.channel_state(0), Some(ChannelState::Receiving));
        assert_eq!(dshot.debug().snapshot().read_done, 1);

        dshot.start_update(1);
        assert_eq!(dshot.channel_state(0), Some(ChannelState::Transmitting));
        assert!(!dshot.has_telemetry(0));
        let calls = dshot.hardware().take();
        assert!(calls.contains(&Call::Dma(0, Direction::Output)));
        assert_eq!(calls.last(), Some(&Call::Enable(3, 2)));
    }

    #[test]
    fn consumed_telemetry_is_mirrored_to_debug() {
        let mut dshot = output(MotorConfig::default());
        dshot.configure_motor(0, pin(3, TimerChannel::Ch1)).unwrap();

        dshot.transmit(0, 1000, &NoCommands);
        dshot.on_transfer_complete(0);
        // nothing captured: zero-length pairs all read as ones, 0xffff checks out
        dshot.on_transfer_complete(0);
        dshot.start_update(1);

        assert_eq!(dshot.telemetry(0), 0x0fff);
        let snapshot = dshot.debug().snapshot();
        assert_eq!(snapshot.rpm_telemetry[0], 0x0fff);
        assert_eq!(snapshot.invalid_packets, 0);
    }

    #[test]
    fn rejected_capture_kept_for_motor_zero() {
        let mut dshot = output(MotorConfig::default());
        dshot.configure_motor(0, pin(3, TimerChannel::Ch1)).unwrap();

        dshot.transmit(0, 1000, &NoCommands);
        dshot.on_transfer_complete(0);
        // first bit reads as zero: 0x7fff fails the checksum
        unsafe { dshot.channels[0].input.as_mut()[1] = 5 };
        dshot.on_transfer_complete(0);
        dshot.start_update(1);

        assert_eq!(dshot.telemetry(0), 0);
        assert_eq!(dshot.debug().snapshot().invalid_packets, 1);
        let capture = dshot.debug().last_invalid_capture();
        assert_eq!(capture[1], 5);
        assert!(capture[2..].iter().all(|&t| t == 0));
    }

    #[test]
    fn stays_transmitting_without_telemetry() {
        let config = MotorConfig {
            use_dshot_telemetry: false,
            ..MotorConfig::default()
        };
        let mut dshot = output(config);
        dshot.configure_motor(0, pin(3, TimerChannel::Ch1)).unwrap();
        dshot.hardware().take();

        dshot.start_update(1);
        assert!(dshot.hardware().take().is_empty());

        dshot.transmit(0, 48, &NoCommands);
        dshot.complete_update(1, &mut NoCommands);
        dshot.on_transfer_complete(0);
        assert_eq!(dshot.channel_state(0), Some(ChannelState::Transmitting));
        let calls = dshot.hardware().take();
        assert!(!calls.iter().any(|c| matches!(c, Call::Dma(_, Direction::Input))));
    }

    #[test]
    fn queued_command_overrides_value() {
        let mut dshot = output(MotorConfig::default());
        dshot.configure_motor(0, pin(3, TimerChannel::Ch1)).unwrap();
        let mut commands = OneCommand {
            processing: true,
            queued: false,
            enabled: true,
            advanced: 0,
        };

        dshot.transmit(0, 1500, &commands);
        assert_eq!(dshot.value(0), 21);
        dshot.complete_update(1, &mut commands);
        assert_eq!(commands.advanced, 1);
    }

    #[test]
    fn queued_command_holds_output() {
        let mut dshot = output(MotorConfig::default());
        dshot.configure_motor(0, pin(3, TimerChannel::Ch1)).unwrap();
        let mut commands = OneCommand {
            processing: false,
            queued: true,
            enabled: false,
            advanced: 0,
        };

        dshot.transmit(0, 100, &commands);
        dshot.hardware().take();
        dshot.complete_update(1, &mut commands);

        assert!(dshot.hardware().take().is_empty());
        assert_eq!(commands.advanced, 0);
    }

    #[test]
    fn burst_mode_shares_one_stream_per_timer() {
        let config = MotorConfig {
            use_dshot_telemetry: false,
            dma_mode: DmaMode::Burst,
            ..MotorConfig::default()
        };
        let mut dshot = output(config);
        dshot.configure_motor(0, pin(3, TimerChannel::Ch3)).unwrap();
        dshot.configure_motor(1, pin(3, TimerChannel::Ch4)).unwrap();

        let calls = dshot.hardware().take();
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::BurstConfig(_))).count(),
            1
        );
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::Enable(3, _))).count(),
            2
        );

        dshot.transmit(0, 300, &NoCommands);
        dshot.transmit(1, 300, &NoCommands);
        dshot.complete_update(2, &mut NoCommands);
        assert_eq!(
            dshot.hardware().take(),
            [
                Call::BurstStart(3, DSHOT_DMA_BUFFER_SIZE * BURST_STRIDE),
                Call::TimerDmaOn(3, DmaSources::UPDATE.bits()),
            ]
        );

        dshot.on_transfer_complete(0);
        assert_eq!(
            dshot.hardware().take(),
            [
                Call::BurstStop(3),
                Call::TimerDmaOff(3, DmaSources::UPDATE.bits())
            ]
        );
    }
}
