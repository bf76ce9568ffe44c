//! Deterministic simulation harness for bootloader oracle testing.
//!
//! This crate provides in-memory implementations of the `Environment`,
//! `Transport` and `HardwareControl` traits plus a model of the bootloader
//! firmware, enabling deterministic, reproducible testing of the client,
//! the fault injector and the orchestrator without a board attached.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_device;
pub mod sim_env;
pub mod sim_hardware;
pub mod sim_transport;

pub use sim_device::{DeviceConfig, DeviceFaults, DeviceStats, SharedDevice, SimDevice};
pub use sim_env::SimEnv;
pub use sim_hardware::SimHardware;
pub use sim_transport::{ScriptedTransport, SimTransport};
