pub mod dshot;
pub mod dshot_output;
pub mod dshot_telemetry;
pub mod filter;
pub mod motor_hw;
pub mod rpm_filter;
