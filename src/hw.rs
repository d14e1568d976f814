//! STM32F405 binding of [`MotorHardware`].
//!
//! Timer registers are driven through the PAC. DMA streams are owned by one
//! high priority task per motor (see `tasks::motor_dma`); starting a stream
//! here only hands that task an [`Arm`] request.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use embassy_stm32::pac;
use embassy_stm32::pac::timer::{vals, TimGp16};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;

use rpm_dshot::config::Protocol;
use rpm_dshot::drivers::motor_hw::{Direction, DmaSources, MotorHardware, MotorPin, TimerId};

use crate::board::{BURST_MOTOR, MOTOR_COUNT, MOTOR_LINES};

/// DMAR burst base: CCR1 (0x34 / 4).
const DCR_DBA_CCR1: u8 = 13;
/// Four transfers per burst (DBL + 1).
const DCR_DBL_FOUR: u8 = 3;

/// Transfer request for a motor's DMA stream.
pub struct Arm {
    pub direction: Direction,
    pub memory: *mut u32,
    pub peripheral: *mut u32,
    pub len: usize,
}

// Raw addresses of static DMA buffers and timer registers.
unsafe impl Send for Arm {}

pub static ARM: [Signal<CriticalSectionRawMutex, Arm>; MOTOR_COUNT] =
    [const { Signal::new() }; MOTOR_COUNT];

fn regs(timer: TimerId) -> Option<TimGp16> {
    // TIM2/TIM5 are 32 bit but share the 16 bit register layout.
    let base = match timer.0 {
        2 => pac::TIM2.as_ptr(),
        3 => pac::TIM3.as_ptr(),
        4 => pac::TIM4.as_ptr(),
        5 => pac::TIM5.as_ptr(),
        _ => return None,
    };
    Some(unsafe { TimGp16::from_ptr(base) })
}

pub struct Stm32Motors {
    timer_clock_hz: u32,
    buffers: [AtomicPtr<u32>; MOTOR_COUNT],
    inputs: [AtomicBool; MOTOR_COUNT],
    burst: [AtomicPtr<u32>; BURST_MOTOR.len()],
}

impl Stm32Motors {
    pub fn new(timer_clock_hz: u32) -> Self {
        Self {
            timer_clock_hz,
            buffers: [const { AtomicPtr::new(ptr::null_mut()) }; MOTOR_COUNT],
            inputs: [const { AtomicBool::new(false) }; MOTOR_COUNT],
            burst: [const { AtomicPtr::new(ptr::null_mut()) }; BURST_MOTOR.len()],
        }
    }

    fn ccr(motor: usize) -> Option<*mut u32> {
        let line = MOTOR_LINES.get(motor)?;
        let r = regs(line.timer)?;
        Some(r.ccr(line.channel.index()).as_ptr() as *mut u32)
    }

    fn burst_slot(timer: TimerId) -> Option<(usize, u8)> {
        BURST_MOTOR
            .iter()
            .position(|(t, _)| *t == timer)
            .map(|slot| (slot, BURST_MOTOR[slot].1))
    }
}

impl MotorHardware for Stm32Motors {
    fn init_timer(&self, timer: TimerId, protocol: Protocol) {
        let Some(r) = regs(timer) else {
            defmt::error!("TIM{} not wired", timer.0);
            return;
        };
        pac::RCC.apb1enr().modify(|w| match timer.0 {
            2 => w.set_tim2en(true),
            3 => w.set_tim3en(true),
            4 => w.set_tim4en(true),
            _ => w.set_tim5en(true),
        });

        let psc = protocol.prescaler(self.timer_clock_hz);
        r.cr1().modify(|w| w.set_cen(false));
        r.psc().write_value(psc);
        r.arr().write(|w| w.set_arr((protocol.timer_period() - 1) as u16));
        r.egr().write(|w| w.set_ug(true));
        r.cr1().modify(|w| {
            w.set_arpe(true);
            w.set_cen(true);
        });
        defmt::info!(
            "TIM{}: {} Hz bit clock, psc {}",
            timer.0,
            protocol.bit_clock_hz(),
            psc
        );
    }

    fn set_channel_mode(&self, pin: &MotorPin, direction: Direction) {
        let Some(r) = regs(pin.timer) else {
            return;
        };
        let n = pin.channel.index();

        // CCxS is only writable with the channel off
        r.ccer().modify(|w| w.set_cce(n, false));
        match direction {
            Direction::Output => {
                r.ccmr_input(n / 2)
                    .modify(|w| w.set_ccs(n % 2, vals::CcmrInputCcs::from_bits(0)));
                r.ccmr_output(n / 2).modify(|w| {
                    w.set_ocpe(n % 2, false);
                    w.set_ocm(n % 2, vals::Ocm::PWMMODE1);
                    w.set_ocpe(n % 2, true);
                });
                r.ccr(n).modify(|w| w.set_ccr(0));
                r.ccer().modify(|w| {
                    w.set_ccp(n, pin.inverted);
                    w.set_ccnp(n, false);
                });
            }
            Direction::Input => {
                // direct TI, no filter, no prescaler
                r.ccmr_input(n / 2).modify(|w| {
                    w.set_ccs(n % 2, vals::CcmrInputCcs::from_bits(1));
                    w.set_icpsc(n % 2, 0);
                });
                r.ccer().modify(|w| {
                    w.set_ccp(n, true);
                    w.set_ccnp(n, true);
                    w.set_cce(n, true);
                });
            }
        }
    }

    fn configure_dma(&self, motor: u8, direction: Direction, buffer: *mut u32) {
        let m = motor as usize;
        if let (Some(slot), Some(input)) = (self.buffers.get(m), self.inputs.get(m)) {
            slot.store(buffer, Ordering::Relaxed);
            input.store(direction == Direction::Input, Ordering::Relaxed);
        }
    }

    fn dma_start(&self, motor: u8, len: usize) {
        let m = motor as usize;
        let (Some(arm), Some(peripheral)) = (ARM.get(m), Self::ccr(m)) else {
            return;
        };
        let direction = if self.inputs[m].load(Ordering::Relaxed) {
            Direction::Input
        } else {
            Direction::Output
        };
        arm.signal(Arm {
            direction,
            memory: self.buffers[m].load(Ordering::Relaxed),
            peripheral,
            len,
        });
    }

    fn dma_stop(&self, _motor: u8) {
        // the stream disables itself on transfer complete
    }

    fn enable_channel_output(&self, pin: &MotorPin) {
        let Some(r) = regs(pin.timer) else {
            return;
        };
        let n = pin.channel.index();
        r.ccer().modify(|w| {
            if pin.complementary {
                w.set_ccne(n, true);
            } else {
                w.set_cce(n, true);
            }
        });
    }

    fn timer_dma_enable(&self, timer: TimerId, sources: DmaSources) {
        if let Some(r) = regs(timer) {
            r.dier().modify(|w| w.0 |= sources.bits() as u32);
        }
    }

    fn timer_dma_disable(&self, timer: TimerId, sources: DmaSources) {
        if let Some(r) = regs(timer) {
            r.dier().modify(|w| w.0 &= !(sources.bits() as u32));
        }
    }

    fn reset_counter(&self, timer: TimerId) {
        if let Some(r) = regs(timer) {
            r.cnt().write(|w| w.set_cnt(0));
        }
    }

    fn configure_burst_dma(&self, timer: TimerId, buffer: *mut u32) {
        let (Some(r), Some((slot, _))) = (regs(timer), Self::burst_slot(timer)) else {
            defmt::error!("TIM{} has no burst stream", timer.0);
            return;
        };
        self.burst[slot].store(buffer, Ordering::Relaxed);
        r.dcr().modify(|w| {
            w.set_dba(DCR_DBA_CCR1);
            w.set_dbl(DCR_DBL_FOUR);
        });
    }

    fn burst_start(&self, timer: TimerId, len: usize) {
        let (Some(r), Some((slot, motor))) = (regs(timer), Self::burst_slot(timer)) else {
            return;
        };
        ARM[motor as usize].signal(Arm {
            direction: Direction::Output,
            memory: self.burst[slot].load(Ordering::Relaxed),
            peripheral: r.dmar().as_ptr() as *mut u32,
            len,
        });
    }

    fn burst_stop(&self, _timer: TimerId) {}

    fn micros(&self) -> u32 {
        Instant::now().as_micros() as u32
    }
}
