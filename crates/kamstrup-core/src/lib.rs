//! # Kamstrup Core Library
//!
//! Core functionality for reading Kamstrup heat meters through the optical head.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The framed, byte-stuffed, CRC-checked register request/response codec
//! - Decoding of the packed base/exponent/unit value representation
//! - Serial transport for the 1200 baud optical link
//! - A line-serializing client with retry/backoff
//! - JSON configuration for the reader service
//!
//! ## Example
//!
//! ```rust,ignore
//! use kamstrup_core::client::MeterClient;
//! use std::time::Duration;
//!
//! let client = MeterClient::new("/dev/ttyUSB0", Duration::from_millis(500));
//! let (reading, attempts) = client.read_register_with_retry(0x3c, 5, Duration::from_secs(1));
//! let reading = reading?;
//! println!("{} {} after {} attempt(s)", reading.value, reading.unit, attempts);
//! ```

pub mod client;
pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{retry_with_backoff, MeterClient};
    pub use crate::config::{DeviceConfig, MqttConfig, Notification, ReaderConfig};
    pub use crate::protocol::{
        decode_response, encode_request, ProtocolError, Reading, RegisterValue, Request, Response,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
