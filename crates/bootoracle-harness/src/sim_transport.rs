//! In-memory transports.
//!
//! - [`SimTransport`] connects a client to a [`SimDevice`](crate::SimDevice).
//! - [`ScriptedTransport`] replays fixed inbound bytes and records writes,
//!   for exercising the frame reader without a device model.
//!
//! Both advance the virtual clock by the full read timeout when nothing is
//! available, which is what a real serial port does in wall time.

use std::{collections::VecDeque, time::Duration};

use bootoracle_core::{
    env::Environment,
    error::TransportError,
    transport::Transport,
};

use crate::{
    sim_device::{SharedDevice, lock},
    sim_env::SimEnv,
};

/// Transport wired to a simulated device.
#[derive(Debug)]
pub struct SimTransport {
    device: SharedDevice,
    env: SimEnv,
    open: bool,
    bytes_written: usize,
    received: Vec<u8>,
}

impl SimTransport {
    /// Opens a connection to `device`, timestamping with `env`.
    pub fn new(device: SharedDevice, env: SimEnv) -> Self {
        Self { device, env, open: true, bytes_written: 0, received: Vec::new() }
    }

    /// Device on the other end
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Every byte read so far
    pub fn received(&self) -> &[u8] {
        &self.received
    }
}

impl Transport for SimTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let chunk = lock(&self.device).take_output(buf.len());
        if chunk.is_empty() {
            self.env.sleep(timeout)?;
            return Err(TransportError::Timeout(timeout));
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        self.received.extend_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        lock(&self.device).receive(data, self.env.now());
        self.bytes_written += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if self.open { Ok(()) } else { Err(TransportError::NotOpen) }
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        lock(&self.device).clear_output();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Transport that replays queued bytes.
#[derive(Debug)]
pub struct ScriptedTransport {
    env: SimEnv,
    inbound: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    open: bool,
}

impl ScriptedTransport {
    /// Creates an open transport with nothing queued.
    pub fn new(env: SimEnv) -> Self {
        Self {
            env,
            inbound: VecDeque::new(),
            replies: VecDeque::new(),
            written: Vec::new(),
            open: true,
        }
    }

    /// Makes `bytes` available to read now.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Queues `bytes` to become readable after the next write.
    pub fn reply_with(&mut self, bytes: impl Into<Vec<u8>>) {
        self.replies.push_back(bytes.into());
    }

    /// Every write, in order
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.inbound.len()
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.inbound.is_empty() {
            self.env.sleep(timeout)?;
            return Err(TransportError::Timeout(timeout));
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.written.push(data.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.inbound.extend(reply);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
