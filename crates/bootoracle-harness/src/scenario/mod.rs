//! Scenario testing framework for deterministic simulation tests.
//!
//! This module provides a declarative API for writing scenario-based tests
//! that follow the Oracle Pattern. Scenarios wire a client, a simulated
//! bootloader and a simulated debug probe together on one virtual clock,
//! execute steps, and enforce oracle verification.

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario, Step};
pub use oracle::OracleFn;
pub use world::{Outcome, ProbeLog, World};
