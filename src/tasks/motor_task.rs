use core::sync::atomic::Ordering;

use embassy_executor::task;
use embassy_time::{Duration, Ticker};

use rpm_dshot::config::LoopTiming;
use rpm_dshot::drivers::dshot::NoCommands;
use rpm_dshot::drivers::rpm_filter::RpmFilter;

use crate::board::MOTOR_COUNT;
use crate::{Motors, MOTOR_THROTTLE};

// ── Loop constants ────────────────────────────────────────────────────────────

/// Keep the ESCs at zero throttle whatever MOTOR_THROTTLE says.
const ESC_OUTPUT_LOCKED: bool = true;
/// Debug snapshot period, in loop ticks.
const LOG_EVERY: u32 = 4000;

// ── Task ─────────────────────────────────────────────────────────────────────

/// Motor output at the PID rate: telemetry in, DSHOT frames out, notch
/// retune.
#[task]
pub async fn motor_task(motors: &'static Motors, timing: LoopTiming, mut rpm: RpmFilter<MOTOR_COUNT>) {
    let loop_hz = (1_000_000.0 / timing.pid_looptime_us()) as u64;
    let mut ticker = Ticker::every(Duration::from_hz(loop_hz));
    let mut ticks: u32 = 0;
    let count = MOTOR_COUNT as u8;

    loop {
        ticker.next().await;

        // ── A. Telemetry from the previous cycle, lines back to output ───────
        motors.start_update(count);

        // ── B. Load and fire all motors ───────────────────────────────────────
        for (i, throttle) in MOTOR_THROTTLE.iter().enumerate() {
            let value = if ESC_OUTPUT_LOCKED {
                0
            } else {
                throttle.load(Ordering::Relaxed)
            };
            motors.transmit(i as u8, value, &NoCommands);
        }
        motors.complete_update(count, &mut NoCommands);

        // ── C. Notch retune ───────────────────────────────────────────────────
        rpm.update(|m| motors.telemetry(m));

        ticks = ticks.wrapping_add(1);
        if ticks % LOG_EVERY == 0 {
            let debug = motors.debug().snapshot();
            let mut hz = [0.0f32; MOTOR_COUNT];
            for (i, f) in hz.iter_mut().enumerate() {
                *f = rpm.motor_frequency(i);
            }
            defmt::info!(
                "dshot: read {} bad {} turn {}us erpm/100 {} | notch base {} Hz",
                debug.read_done,
                debug.invalid_packets,
                debug.set_direction_us,
                debug.rpm_telemetry,
                hz
            );
        }
    }
}
