pub mod motor_dma;
pub mod motor_task;
