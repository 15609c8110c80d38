//! Kamstrup Meter Protocol
//!
//! Implements the Kamstrup optical head register protocol.
//!
//! Frames are a prefix byte, a byte-stuffed message protected by a 16-bit CRC
//! (polynomial 0x1021), and a 0x0d terminator.

pub mod crc;
mod error;
mod packet;
pub mod serial;
pub mod stream;
pub mod stuffing;
pub mod units;

pub use crc::checksum;
pub use error::ProtocolError;
pub use packet::{decode_response, encode_request, Reading, RegisterValue, Request, Response};
pub use serial::{configure_port, list_ports, open_port, PortInfo};
pub use stream::{MeterChannel, SerialChannel};

/// Baud rate of the optical head
pub const DEFAULT_BAUD_RATE: u32 = 1200;

/// Default read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Prefix byte sent in front of every request
pub const REQUEST_PREFIX: u8 = 0x80;

/// Terminator byte closing every frame on the wire
pub const FRAME_TERMINATOR: u8 = 0x0d;

/// Escape marker used by byte-stuffing
pub const ESCAPE_MARKER: u8 = 0x1b;

/// Destination address byte leading every message
pub const DESTINATION_ADDRESS: u8 = 0x3f;

/// Command byte for "get register"
pub const CMD_GET_REGISTER: u8 = 0x10;

/// Number of registers requested per frame
pub const REGISTER_COUNT: u8 = 0x01;
