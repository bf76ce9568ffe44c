//! Byte-stream transport abstraction.
//!
//! The client never talks to a serial port directly. Production code passes
//! a serial implementation; tests pass in-memory pipes from
//! `bootoracle-harness`. A transport is owned by exactly one client.

use std::time::Duration;

use crate::error::TransportError;

/// Blocking duplex byte stream with bounded reads.
pub trait Transport {
    /// Reads at most `buf.len()` bytes, waiting up to `timeout` for the
    /// first byte.
    ///
    /// Returns the number of bytes read, which is at least one.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` if nothing arrives within `timeout`
    /// - `TransportError::NotOpen` if the connection is closed
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Writes `data`, returning the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// `TransportError` if the connection is closed or the write fails.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Blocks until written bytes have left the host.
    ///
    /// # Errors
    ///
    /// `TransportError` if the connection is closed or flushing fails.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Drops any received bytes not yet read.
    ///
    /// # Errors
    ///
    /// `TransportError` if the connection is closed.
    fn discard_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Closes the connection. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// `TransportError::Io` if releasing the connection fails.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the connection is open.
    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).read(buf, timeout)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush()
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        (**self).discard_input()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
