//! Frame encoding/decoding
//!
//! Request on the wire:
//! - 1 byte: prefix (0x80)
//! - stuffed: 0x3f 0x10 0x01 regHi regLo crcHi crcLo
//! - 1 byte: terminator (0x0d)
//!
//! Response on the wire:
//! - 1 byte: prefix (any value, ignored)
//! - stuffed: 0x3f 0x10 regHi regLo unit baseLen exp base[baseLen] crcHi crcLo
//! - 1 byte: terminator (0x0d)

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use super::{
    crc::checksum,
    stuffing::{stuff, unstuff},
    units::unit_for_code,
    ProtocolError, CMD_GET_REGISTER, DESTINATION_ADDRESS, FRAME_TERMINATOR, REGISTER_COUNT,
    REQUEST_PREFIX,
};

/// Length of the unescaped request message, CRC included
const REQUEST_LEN: usize = 7;

/// Offset of the first base byte in a response
const BASE_OFFSET: usize = 7;

/// Exponent byte: magnitude of the power of ten
const EXP_MAGNITUDE_MASK: u8 = 0x3f;
/// Exponent byte: negate the power before exponentiation
const EXP_NEGATE_POWER: u8 = 0x40;
/// Exponent byte: negate the multiplier after exponentiation
const EXP_NEGATE_MULTIPLIER: u8 = 0x80;

/// A decoded register value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Scaled value
    pub value: f64,
    /// Unit string, empty when the meter sent an unknown unit code
    pub unit: &'static str,
}

/// Outcome of reading one register
pub type RegisterValue = Result<Reading, ProtocolError>;

/// A register read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Register being requested
    pub register: i16,
}

impl Request {
    /// Create a request for `register`
    pub fn new(register: i16) -> Self {
        Self { register }
    }

    /// The unescaped message with its CRC filled in
    pub fn message(&self) -> [u8; REQUEST_LEN] {
        let mut msg = [0u8; REQUEST_LEN];
        msg[0] = DESTINATION_ADDRESS;
        msg[1] = CMD_GET_REGISTER;
        msg[2] = REGISTER_COUNT;
        BigEndian::write_i16(&mut msg[3..5], self.register);

        // CRC is computed with its own field still zero, then written in place
        let crc = checksum(&msg);
        BigEndian::write_u16(&mut msg[5..7], crc);
        msg
    }

    /// Encode the request to raw wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let stuffed = stuff(&self.message());

        let mut bytes = Vec::with_capacity(stuffed.len() + 2);
        bytes.push(REQUEST_PREFIX);
        bytes.extend_from_slice(&stuffed);
        bytes.push(FRAME_TERMINATOR);
        bytes
    }
}

/// A validated register response
///
/// Holding a `Response` guarantees the CRC was zero, the header and register
/// echo matched and the declared base bytes are present, so the accessors
/// below cannot go out of bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    message: Vec<u8>,
}

impl Response {
    /// Decode and validate a raw frame received for `register`
    ///
    /// `raw` is everything read up to and including the terminator.
    pub fn from_bytes(raw: &[u8], register: i16) -> Result<Self, ProtocolError> {
        if raw.len() < 2 {
            return Err(ProtocolError::MalformedResponse {
                message: raw.to_vec(),
            });
        }

        let message = frame_body(raw)?;

        let remainder = checksum(&message);
        if remainder != 0 {
            return Err(ProtocolError::CrcError { remainder });
        }

        Self::validate(message, register)
    }

    fn validate(message: Vec<u8>, register: i16) -> Result<Self, ProtocolError> {
        let mut expected_register = [0u8; 2];
        BigEndian::write_i16(&mut expected_register, register);

        let valid = message.len() >= 6
            && message.len() >= message[5] as usize + BASE_OFFSET
            && message[0] == DESTINATION_ADDRESS
            && message[1] == CMD_GET_REGISTER
            && message[2..4] == expected_register;

        if !valid {
            return Err(ProtocolError::MalformedResponse { message });
        }

        Ok(Self { message })
    }

    /// Raw unit code
    pub fn unit_code(&self) -> u8 {
        self.message[4]
    }

    /// Raw exponent byte
    pub fn exponent_byte(&self) -> u8 {
        self.message[6]
    }

    /// Big-endian base magnitude bytes
    pub fn base_bytes(&self) -> &[u8] {
        let len = self.message[5] as usize;
        &self.message[BASE_OFFSET..BASE_OFFSET + len]
    }

    /// Unit string for the unit code
    pub fn unit(&self) -> &'static str {
        unit_for_code(self.unit_code())
    }

    /// Unsigned base magnitude
    pub fn base(&self) -> u64 {
        self.base_bytes()
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }

    /// Signed power-of-ten multiplier
    ///
    /// Bit 0x40 negates the power, bit 0x80 negates the multiplier itself.
    pub fn multiplier(&self) -> f64 {
        let exp = self.exponent_byte();

        let mut power = i32::from(exp & EXP_MAGNITUDE_MASK);
        if exp & EXP_NEGATE_POWER != 0 {
            power = -power;
        }

        let multiplier = 10f64.powf(f64::from(power));
        if exp & EXP_NEGATE_MULTIPLIER != 0 {
            -multiplier
        } else {
            multiplier
        }
    }

    /// Scaled value
    pub fn value(&self) -> f64 {
        (self.base() as i64) as f64 * self.multiplier()
    }

    /// Value and unit together
    pub fn reading(&self) -> Reading {
        Reading {
            value: self.value(),
            unit: self.unit(),
        }
    }
}

/// Unescape the bytes between prefix and terminator
///
/// An escape marker in the last position takes the terminator as its operand,
/// so the frame goes on to fail its CRC check.
fn frame_body(raw: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    unstuff(&raw[1..raw.len() - 1]).or_else(|_| unstuff(&raw[1..]))
}

/// Encode a read request for `register` into wire bytes
pub fn encode_request(register: i16) -> Vec<u8> {
    Request::new(register).to_bytes()
}

/// Decode a raw response frame for `register`
pub fn decode_response(raw: &[u8], register: i16) -> RegisterValue {
    Response::from_bytes(raw, register).map(|response| response.reading())
}
