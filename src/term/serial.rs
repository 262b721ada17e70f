//! Direct serial attachment to a locally connected board.
//!
//! Wraps the `serialport` crate's `SerialPort` as a [`Transport`], for boards
//! whose terminal is read straight from `PORT` instead of through `make term`.

use super::error::ShellError;
use super::traits::Transport;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate`, 8N1, no flow control.
    ///
    /// # Example
    /// ```no_run
    /// use release_specs::term::SerialTransport;
    ///
    /// let port = SerialTransport::open("/dev/ttyACM0", 115_200)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, ShellError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()?;

        // Whatever the board printed before we attached belongs to no command.
        port.clear(serialport::ClearBuffer::Input)?;

        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
        })
    }

    fn closed(&self) -> ShellError {
        ShellError::Closed {
            node: self.name.clone(),
            output: String::new(),
        }
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ShellError> {
        let Some(port) = self.port.as_mut() else {
            return Err(self.closed());
        };
        port.write_all(data)?;
        port.flush()?;
        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, ShellError> {
        let Some(port) = self.port.as_mut() else {
            return Err(self.closed());
        };
        port.set_timeout(timeout.max(Duration::from_millis(1)))?;
        match port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(self.closed()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), ShellError> {
        // Dropping the handle releases the device.
        self.port.take();
        Ok(())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("baud_rate", &self.port.as_ref().and_then(|p| p.baud_rate().ok()))
            .field("open", &self.port.is_some())
            .finish()
    }
}
