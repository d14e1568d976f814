//! Seam between the motor output state machine and the timer/DMA peripherals.
//!
//! The state machine only ever talks to hardware through [`MotorHardware`].
//! Implementations are register-level and must be callable from both the
//! motor loop and the transfer-complete interrupt, hence `&self` throughout.

use core::cell::UnsafeCell;
use core::ops::{BitOr, BitOrAssign};

use crate::config::Protocol;

/// Identity of a physical timer (TIM3 → `TimerId(3)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId(pub u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerChannel {
    Ch1,
    Ch2,
    Ch3,
    Ch4,
}

impl TimerChannel {
    pub fn index(self) -> usize {
        match self {
            TimerChannel::Ch1 => 0,
            TimerChannel::Ch2 => 1,
            TimerChannel::Ch3 => 2,
            TimerChannel::Ch4 => 3,
        }
    }

    /// Capture/compare DMA request enable bit (CCxDE) in TIMx_DIER.
    pub fn dma_source(self) -> DmaSources {
        DmaSources(1 << (9 + self.index()))
    }
}

/// Set of TIMx_DIER DMA request enables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaSources(pub u16);

impl DmaSources {
    pub const NONE: DmaSources = DmaSources(0);
    /// Update DMA request (UDE), used by burst transfers.
    pub const UPDATE: DmaSources = DmaSources(1 << 8);

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: DmaSources) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DmaSources {
    type Output = DmaSources;

    fn bitor(self, rhs: DmaSources) -> DmaSources {
        DmaSources(self.0 | rhs.0)
    }
}

impl BitOrAssign for DmaSources {
    fn bitor_assign(&mut self, rhs: DmaSources) {
        self.0 |= rhs.0;
    }
}

/// Where a motor's signal leaves the MCU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorPin {
    pub timer: TimerId,
    pub channel: TimerChannel,
    /// Signal is on the complementary (CHxN) output.
    pub complementary: bool,
    pub inverted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Output compare, memory → CCR.
    Output,
    /// Input capture on both edges, CCR → memory.
    Input,
}

/// Word buffer a DMA stream reads from or writes into.
///
/// Ownership alternates between the CPU and the DMA engine; the driver only
/// touches the contents while the stream using it is disabled.
pub struct DmaBuffer<const N: usize>(UnsafeCell<[u32; N]>);

// Shared between the motor loop and the interrupt handler, one writer at a time.
unsafe impl<const N: usize> Sync for DmaBuffer<N> {}

impl<const N: usize> DmaBuffer<N> {
    pub const fn new() -> Self {
        Self(UnsafeCell::new([0; N]))
    }

    pub fn as_mut_ptr(&self) -> *mut u32 {
        self.0.get() as *mut u32
    }

    /// # Safety
    ///
    /// No DMA transfer may be using the buffer and no other reference to its
    /// contents may be alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut(&self) -> &mut [u32; N] {
        &mut *self.0.get()
    }

    /// # Safety
    ///
    /// No DMA transfer may be writing the buffer.
    pub unsafe fn as_ref(&self) -> &[u32; N] {
        &*self.0.get()
    }
}

impl<const N: usize> Default for DmaBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub trait MotorHardware {
    /// Time base for `protocol`: prescaler, period, preload, main output
    /// enable. Called once per timer, for the first motor bound to it.
    fn init_timer(&self, timer: TimerId, protocol: Protocol);

    /// Switches the timer channel between PWM output compare and input
    /// capture.
    fn set_channel_mode(&self, pin: &MotorPin, direction: Direction);

    /// Re-initializes the motor's DMA stream for `direction` on `buffer`.
    /// The stream is left disabled with its transfer-complete interrupt on.
    fn configure_dma(&self, motor: u8, direction: Direction, buffer: *mut u32);

    /// Sets the transfer count and enables the motor's stream.
    fn dma_start(&self, motor: u8, len: usize);

    fn dma_stop(&self, motor: u8);

    /// Enables the channel's output line (CCxE, or CCxNE when complementary).
    /// This does not survive an input capture round trip.
    fn enable_channel_output(&self, pin: &MotorPin);

    fn timer_dma_enable(&self, timer: TimerId, sources: DmaSources);

    fn timer_dma_disable(&self, timer: TimerId, sources: DmaSources);

    fn reset_counter(&self, timer: TimerId);

    /// Points the timer's update DMA stream at the shared burst buffer,
    /// writing CCR1..CCR4 through DMAR.
    fn configure_burst_dma(&self, timer: TimerId, buffer: *mut u32);

    fn burst_start(&self, timer: TimerId, len: usize);

    fn burst_stop(&self, timer: TimerId);

    /// Free-running microsecond clock for turnaround diagnostics.
    fn micros(&self) -> u32;
}
