//! CRC-16 (CCITT polynomial 0x1021), bit-serial, MSB first
//!
//! The register starts at zero, there is no final XOR and no bit reflection.
//! A message followed by its CRC evaluates to zero, which is how responses
//! are validated.

const POLYNOMIAL: u32 = 0x1021;

/// Calculate the checksum of `msg`
pub fn checksum(msg: &[u8]) -> u16 {
    let mut reg: u32 = 0;

    for &byte in msg {
        let mut mask: u8 = 0x80;
        while mask > 0 {
            reg <<= 1;
            if byte & mask != 0 {
                reg |= 1;
            }
            mask >>= 1;

            if reg & 0x1_0000 != 0 {
                reg &= 0xffff;
                reg ^= POLYNOMIAL;
            }
        }
    }

    reg as u16
}
