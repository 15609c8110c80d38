//! Transport channel
//!
//! Abstracts the half-duplex line to the meter so the exchange logic can run
//! over a real serial port or an in-memory channel in tests.

use serialport::SerialPort;
use std::io::{self, Read, Write};

use super::{ProtocolError, FRAME_TERMINATOR};

/// Upper bound on a response frame; anything longer is line noise
pub const MAX_FRAME_SIZE: usize = 512;

/// Abstraction for the line to the meter
pub trait MeterChannel: Read + Write + Send {
    /// Discard anything left in the input buffer
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Read up to and including `delimiter`
    ///
    /// A read timeout before the delimiter arrives is reported as
    /// [`ProtocolError::Timeout`].
    fn read_until(&mut self, delimiter: u8) -> Result<Vec<u8>, ProtocolError> {
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.read(&mut byte) {
                Ok(0) => return Err(ProtocolError::Timeout),
                Ok(_) => {
                    frame.push(byte[0]);
                    if byte[0] == delimiter {
                        return Ok(frame);
                    }
                    if frame.len() > MAX_FRAME_SIZE {
                        return Err(ProtocolError::MalformedResponse { message: frame });
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(ProtocolError::Timeout)
                }
                Err(e) => return Err(ProtocolError::IoError(e)),
            }
        }
    }

    /// Read one response frame
    fn read_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.read_until(FRAME_TERMINATOR)
    }
}

/// Serial port wrapper implementing MeterChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl MeterChannel for SerialChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}
