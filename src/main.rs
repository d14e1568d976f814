#![no_std]
#![no_main]

mod board;
mod hw;
mod tasks;

use core::sync::atomic::AtomicU16;

use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::dma::AnyChannel;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use rpm_dshot::config::{LoopTiming, MotorConfig, Protocol, RpmFilterConfig};
use rpm_dshot::drivers::dshot::DshotWaveform;
use rpm_dshot::drivers::dshot_output::DshotOutput;
use rpm_dshot::drivers::rpm_filter::RpmFilter;

use crate::board::{Board, APB1_TIMER_CLOCK_HZ, MOTOR_COUNT, MOTOR_LINES};
use crate::hw::Stm32Motors;
use crate::tasks::motor_dma::motor_dma_task;
use crate::tasks::motor_task::motor_task;

pub type Motors = DshotOutput<Stm32Motors, DshotWaveform, MOTOR_COUNT>;

// ── Motor commands ────────────────────────────────────────────────────────────
pub static MOTOR_THROTTLE: [AtomicU16; MOTOR_COUNT] = [const { AtomicU16::new(0) }; MOTOR_COUNT];

static MOTORS: StaticCell<Motors> = StaticCell::new();

// ── DMA completion executor ───────────────────────────────────────────────────
//  Preempts the motor loop so a finished frame is turned around well before
//  the ESC starts answering.
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn UART5() {
    EXECUTOR_HIGH.on_interrupt()
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;

    // 2. Motor outputs, bidirectional DSHOT600
    let config = MotorConfig {
        protocol: Protocol::Dshot600,
        ..MotorConfig::default()
    };
    board::configure_motor_gpio(config.use_dshot_telemetry);

    let waveform = DshotWaveform::new(config.protocol, config.use_dshot_telemetry);
    let mut motors = DshotOutput::new(Stm32Motors::new(APB1_TIMER_CLOCK_HZ), waveform, config);
    for (i, line) in MOTOR_LINES.iter().enumerate() {
        if let Err(e) = motors.configure_motor(i as u8, line.motor_pin(config.use_dshot_telemetry)) {
            defmt::error!("motor {}: {}", i, e);
        }
    }
    let motors: &'static Motors = MOTORS.init(motors);

    // 3. RPM notch filters
    let timing = LoopTiming::default();
    let rpm = defmt::unwrap!(RpmFilter::new(
        &RpmFilterConfig::default(),
        &config,
        timing,
        MOTOR_COUNT,
    ));

    // 4. One DMA stream task per motor on the high priority executor
    interrupt::UART5.set_priority(Priority::P6);
    let high = EXECUTOR_HIGH.start(interrupt::UART5);
    let streams: [AnyChannel; MOTOR_COUNT] = [
        p.DMA1_CH7.into(),
        p.DMA1_CH2.into(),
        p.DMA1_CH6.into(),
        p.DMA1_CH1.into(),
    ];
    for (i, (dma, line)) in streams.into_iter().zip(MOTOR_LINES.iter()).enumerate() {
        high.spawn(motor_dma_task(motors, i as u8, dma, line.dma_request))
            .unwrap();
    }

    // 5. Motor loop at the PID rate
    defmt::info!(
        "{} motors, {}, {} notch updates per tick",
        MOTOR_COUNT,
        config.protocol,
        rpm.updates_per_iteration()
    );
    spawner.spawn(motor_task(motors, timing, rpm)).unwrap();
}
