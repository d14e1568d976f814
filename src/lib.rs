//! Motor output core for a flight controller.
//!
//! DSHOT/Proshot transmission over timer + DMA with bidirectional telemetry
//! capture, the telemetry decoders, and the RPM-driven notch filter bank fed
//! by the decoded motor speeds.
//!
//! The library is hardware agnostic: everything register-level sits behind
//! [`drivers::motor_hw::MotorHardware`]. The STM32F405 binding lives in the
//! firmware binary (`--features firmware`).

#![no_std]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod drivers;
pub mod state;
