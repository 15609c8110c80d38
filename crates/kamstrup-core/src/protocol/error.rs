//! Protocol errors

use thiserror::Error;

/// Errors that can occur while reading a register from the meter
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Timed out waiting for response from meter")]
    Timeout,

    #[error("CRC error in returned data (remainder {remainder:#06x})")]
    CrcError { remainder: u16 },

    #[error("parsed message does not appear to be a valid response: {}", hex(.message))]
    MalformedResponse { message: Vec<u8> },

    #[error("Device {0} not found")]
    UnknownDevice(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the failure came from the line rather than the frame contents
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::SerialError(_) | ProtocolError::Timeout | ProtocolError::IoError(_)
        )
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
