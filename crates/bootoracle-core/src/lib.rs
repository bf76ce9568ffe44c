//! Blocking runtime for the bootloader conformance oracle.
//!
//! This crate drives a real (or simulated) bootloader over a byte stream:
//!
//! ```text
//!   Orchestrator ──► FaultInjector ──► ProtocolClient ──► FrameReader
//!        │                                  │                 │
//!        ▼                                  ▼                 ▼
//!   HardwareControl                    Transport         Environment
//!   (reset, backup)               (serial / in-memory)  (clock, sleep)
//! ```
//!
//! # Key Principles
//!
//! - Injected I/O: the client only sees a [`Transport`], never a port
//! - Injected time: every wait and timestamp goes through [`Environment`],
//!   so `bootoracle-harness` can run a 35 s fault in microseconds
//! - No panics across the public boundary: phase and fault operations
//!   return [`ProtocolResult`]
//!
//! # Modules
//!
//! - [`client`]: four-phase session client
//! - [`fault`]: timeout, corruption and partial-frame injection
//! - [`scenario`]: catalog, validation and fail-fast orchestration
//! - [`hardware`]: reset and flash backup collaborator
//! - [`reader`]: frame reads with per-field timeouts
//! - [`env`], [`transport`]: injected side effects
//! - [`error`], [`result`]: error taxonomy and uniform results

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod env;
pub mod error;
pub mod fault;
pub mod hardware;
pub mod reader;
pub mod result;
pub mod scenario;
pub mod transport;

pub use client::{ClientConfig, ClientState, DeviceInfo, ProtocolClient, RetryPolicy};
pub use env::{CancelToken, Environment, Interrupted, SystemEnv};
pub use error::{OracleError, Result, TransportError};
pub use fault::{FaultConfig, FaultInjector, FaultKind};
pub use hardware::{BackupGuard, ExternallyManaged, FlashBackup, HardwareControl, HardwareError};
pub use reader::{FrameReader, ReadTimeouts};
pub use result::{ProtocolResult, TransmissionRecord};
pub use scenario::{
    Orchestrator, OrchestratorConfig, RunReport, ScenarioCatalog, ScenarioDefinition,
    ScenarioResult, SequenceDefinition, SequenceResult,
};
pub use transport::Transport;
