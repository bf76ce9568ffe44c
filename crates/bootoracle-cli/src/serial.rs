//! Serial port transport.

use std::{
    io::{self, Read, Write},
    time::Duration,
};

use bootoracle_core::{Transport, TransportError};
use serialport::{ClearBuffer, SerialPort};

/// Timeout set when opening, before the first read sets its own
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// 8N1 serial connection to the target's bootloader UART.
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Opens `path` at `baud` baud.
    pub fn open(path: &str, baud: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud).timeout(OPEN_TIMEOUT).open()?;
        tracing::info!(path, baud, "serial port open");
        Ok(Self { path: path.to_string(), port: Some(port) })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let port = self.port()?;
        port.set_timeout(timeout).map_err(port_error)?;
        match port.read(buf) {
            Ok(0) => Err(TransportError::Timeout(timeout)),
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                Err(TransportError::Timeout(timeout))
            },
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port()?;
        port.write_all(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port()?.flush()?;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::Input).map_err(port_error)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            tracing::debug!(path = %self.path, "serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

fn port_error(err: serialport::Error) -> TransportError {
    TransportError::Io(err.to_string())
}
