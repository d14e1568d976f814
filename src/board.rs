use embassy_stm32::pac;
use embassy_stm32::pac::gpio::{vals, Gpio};
use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::Config;

use rpm_dshot::drivers::motor_hw::{MotorPin, TimerChannel, TimerId};

pub const MOTOR_COUNT: usize = 4;

/// TIM2..TIM5 run at 2 × APB1 (42 MHz) with the clock tree below.
pub const APB1_TIMER_CLOCK_HZ: u32 = 84_000_000;

// ── Motor resources ───────────────────────────────────────────────────────────

/// One motor output: pad, timer channel and the DMA1 stream serving it.
pub struct MotorLine {
    pub port: Gpio,
    pub pad: usize,
    pub af: u8,
    pub timer: TimerId,
    pub channel: TimerChannel,
    /// DMA1 channel (request) number of the stream.
    pub dma_request: u8,
}

impl MotorLine {
    /// Bidirectional DSHOT idles high, so the output is inverted.
    pub fn motor_pin(&self, bidirectional: bool) -> MotorPin {
        MotorPin {
            timer: self.timer,
            channel: self.channel,
            complementary: false,
            inverted: bidirectional,
        }
    }
}

//  MOTOR1 PB0  TIM3_CH3  DMA1 stream 7 ch5
//  MOTOR2 PB1  TIM3_CH4  DMA1 stream 2 ch5 (also TIM3_UP)
//  MOTOR3 PA3  TIM2_CH4  DMA1 stream 6 ch3
//  MOTOR4 PA2  TIM2_CH3  DMA1 stream 1 ch3 (also TIM2_UP)
pub const MOTOR_LINES: [MotorLine; MOTOR_COUNT] = [
    MotorLine {
        port: pac::GPIOB,
        pad: 0,
        af: 2,
        timer: TimerId(3),
        channel: TimerChannel::Ch3,
        dma_request: 5,
    },
    MotorLine {
        port: pac::GPIOB,
        pad: 1,
        af: 2,
        timer: TimerId(3),
        channel: TimerChannel::Ch4,
        dma_request: 5,
    },
    MotorLine {
        port: pac::GPIOA,
        pad: 3,
        af: 1,
        timer: TimerId(2),
        channel: TimerChannel::Ch4,
        dma_request: 3,
    },
    MotorLine {
        port: pac::GPIOA,
        pad: 2,
        af: 1,
        timer: TimerId(2),
        channel: TimerChannel::Ch3,
        dma_request: 3,
    },
];

/// Motor whose stream doubles as the timer's update (burst) stream.
pub const BURST_MOTOR: [(TimerId, u8); 2] = [(TimerId(3), 1), (TimerId(2), 3)];

/// Alternate function, push-pull, pulled towards the idle level.
pub fn configure_motor_gpio(bidirectional: bool) {
    for line in MOTOR_LINES.iter() {
        let inverted = line.motor_pin(bidirectional).inverted;
        let pull = if inverted == bidirectional {
            vals::Pupdr::PULLUP
        } else {
            vals::Pupdr::PULLDOWN
        };
        let n = line.pad;
        line.port.afr(n / 8).modify(|w| w.set_afr(n % 8, line.af));
        line.port.pupdr().modify(|w| w.set_pupdr(n, pull));
        line.port.otyper().modify(|w| w.set_ot(n, vals::Ot::PUSHPULL));
        line.port
            .ospeedr()
            .modify(|w| w.set_ospeedr(n, vals::Ospeedr::HIGHSPEED));
        line.port.moder().modify(|w| w.set_moder(n, vals::Moder::ALTERNATE));
    }
}

// ── Clocks ────────────────────────────────────────────────────────────────────

pub struct Board {
    pub p: embassy_stm32::Peripherals,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();
        config.rcc.hse = Some(Hse {
            freq: TimeHertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL168,
            divp: Some(PllPDiv::DIV2), // 168 MHz
            divq: None,
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;

        let p = embassy_stm32::init(config);

        Self { p }
    }
}
