//! Meter client
//!
//! Owns the serial configuration for one meter and performs register reads.
//! The optical line carries one exchange at a time, so every read holds the
//! client's line lock from opening the port until the response is decoded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::{
    decode_response, encode_request, open_port, MeterChannel, ProtocolError, RegisterValue,
    SerialChannel,
};

/// Opens a fresh channel to the meter for one exchange
pub type ChannelOpener = dyn Fn() -> Result<Box<dyn MeterChannel>, ProtocolError> + Send + Sync;

/// Client for a single meter on a single serial line
#[derive(Clone)]
pub struct MeterClient {
    opener: Arc<ChannelOpener>,
    line: Arc<Mutex<()>>,
}

impl MeterClient {
    /// Create a client for the meter attached to `serial_port`
    ///
    /// The port is opened per read and closed afterwards.
    pub fn new(serial_port: impl Into<String>, read_timeout: Duration) -> Self {
        let serial_port = serial_port.into();
        Self::with_opener(move || {
            let port = open_port(&serial_port, read_timeout)?;
            Ok(Box::new(SerialChannel::new(port)) as Box<dyn MeterChannel>)
        })
    }

    /// Create a client that obtains its channel from `opener`
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn() -> Result<Box<dyn MeterChannel>, ProtocolError> + Send + Sync + 'static,
    {
        Self {
            opener: Arc::new(opener),
            line: Arc::new(Mutex::new(())),
        }
    }

    /// Read one register
    pub fn read_register(&self, register: i16) -> RegisterValue {
        // A poisoned lock only means another reader panicked; the line itself is fine
        let _line = self.line.lock().unwrap_or_else(|e| e.into_inner());

        let mut channel = (self.opener)()?;
        exchange(channel.as_mut(), register)
    }

    /// Read one register, retrying failed reads
    ///
    /// Returns the first success or the last failure together with the number
    /// of attempts made.
    pub fn read_register_with_retry(
        &self,
        register: i16,
        retries: usize,
        backoff: Duration,
    ) -> (RegisterValue, usize) {
        retry_with_backoff(retries, backoff, || self.read_register(register))
    }
}

/// Perform one request/response round trip on `channel`
pub fn exchange(channel: &mut dyn MeterChannel, register: i16) -> RegisterValue {
    let request = encode_request(register);
    debug!("register {:#06x}: sending {:02x?}", register, request);

    // Leftovers from an abandoned exchange must not be read as this reply
    channel.clear_input_buffer()?;
    channel.write_all(&request)?;
    channel.flush()?;

    let raw = channel.read_frame()?;
    debug!("register {:#06x}: received {:02x?}", register, raw);

    decode_response(&raw, register)
}

/// Run `read` until it succeeds or `retries` extra attempts are used up,
/// sleeping `backoff` between attempts
pub fn retry_with_backoff<F>(retries: usize, backoff: Duration, mut read: F) -> (RegisterValue, usize)
where
    F: FnMut() -> RegisterValue,
{
    let mut value = read();
    let mut retried = 0;

    while retried < retries {
        let Err(e) = &value else { break };
        retried += 1;
        let source = if e.is_transport() { "line" } else { "frame" };
        warn!("{} failure ({}), retry {} of {}", source, e, retried, retries);

        std::thread::sleep(backoff);
        value = read();
    }

    (value, retried + 1)
}
