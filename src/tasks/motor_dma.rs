use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_stm32::dma::{AnyChannel, Request, Transfer, TransferOptions};

use rpm_dshot::drivers::motor_hw::Direction;

use crate::board::MOTOR_COUNT;
use crate::hw::{Arm, ARM};
use crate::Motors;

/// Owns one motor's DMA stream. Runs the transfers [`Arm`]ed by the driver
/// and reports each completion back to it, which is where the line gets
/// turned around for telemetry.
#[task(pool_size = MOTOR_COUNT)]
pub async fn motor_dma_task(motors: &'static Motors, motor: u8, mut dma: AnyChannel, request: Request) {
    let arm = &ARM[motor as usize];
    let mut next = arm.wait().await;

    loop {
        let Arm {
            direction,
            memory,
            peripheral,
            len,
        } = next;
        let options = TransferOptions::default();
        // SAFETY: memory is one of the driver's static DMA buffers, untouched
        // by the CPU until this transfer is reported complete.
        let transfer = unsafe {
            match direction {
                Direction::Output => Transfer::new_write_raw(
                    &mut dma,
                    request,
                    core::ptr::slice_from_raw_parts(memory as *const u32, len),
                    peripheral,
                    options,
                ),
                Direction::Input => Transfer::new_read_raw(
                    &mut dma,
                    request,
                    peripheral,
                    core::ptr::slice_from_raw_parts_mut(memory, len),
                    options,
                ),
            }
        };

        match select(transfer, arm.wait()).await {
            Either::First(()) => {
                motors.on_transfer_complete(motor);
                next = arm.wait().await;
            }
            // no reply from the ESC, the next cycle re-armed the stream
            Either::Second(rearm) => next = rearm,
        }
    }
}
