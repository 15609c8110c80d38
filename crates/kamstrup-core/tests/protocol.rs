use kamstrup_core::client::{exchange, retry_with_backoff, MeterClient};
use kamstrup_core::protocol::stuffing::stuff;
use kamstrup_core::protocol::{checksum, MeterChannel, ProtocolError};
use pretty_assertions::assert_eq;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock optical head for testing
struct MockSerial {
    sent: Arc<Mutex<Vec<u8>>>,
    recv_buffer: Vec<u8>,
    recv_idx: usize,
    fail_on_send: bool,
}

impl MockSerial {
    fn with_response(response: Vec<u8>) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            recv_buffer: response,
            recv_idx: 0,
            fail_on_send: false,
        }
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.recv_idx >= self.recv_buffer.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        }
        let n = buf.len().min(self.recv_buffer.len() - self.recv_idx);
        buf[..n].copy_from_slice(&self.recv_buffer[self.recv_idx..self.recv_idx + n]);
        self.recv_idx += n;
        Ok(n)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "serial write failed"));
        }
        self.sent.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MeterChannel for MockSerial {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Build a wire response frame around `body`
fn response_frame(body: &[u8]) -> Vec<u8> {
    let mut msg = body.to_vec();
    msg.extend_from_slice(&[0, 0]);
    let crc = checksum(&msg);
    let n = msg.len();
    msg[n - 2] = (crc >> 8) as u8;
    msg[n - 1] = (crc & 0xff) as u8;

    let mut raw = vec![0x40];
    raw.extend(stuff(&msg));
    raw.push(0x0d);
    raw
}

/// Shared buffer the test subscriber formats events into
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a debug-level subscriber writing into the returned buffer
fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs.contents())
}

fn energy_frame() -> Vec<u8> {
    response_frame(&[0x3f, 0x10, 0x00, 0x3c, 0x02, 0x04, 0x00, 0x00, 0x00, 0x30, 0x39])
}

#[test]
fn test_exchange_writes_request_and_decodes() {
    let mut mock = MockSerial::with_response(energy_frame());
    let sent = mock.sent.clone();

    let reading = exchange(&mut mock, 0x3c).unwrap();

    assert_eq!(reading.value, 12345.0);
    assert_eq!(reading.unit, "kWh");
    assert_eq!(
        *sent.lock().unwrap(),
        vec![0x80, 0x3f, 0x10, 0x01, 0x00, 0x3c, 0xb2, 0x5f, 0x0d]
    );
}

#[test]
fn test_exchange_logs_wire_bytes() {
    let mut mock = MockSerial::with_response(energy_frame());

    let (reading, logs) = with_captured_logs(|| exchange(&mut mock, 0x3c));

    assert!(reading.is_ok());
    assert!(
        logs.contains("sending [80, 3f, 10, 01, 00, 3c, b2, 5f, 0d]"),
        "{logs}"
    );
    assert!(logs.contains("received [40, 3f, 10, 00, 3c"), "{logs}");
}

#[test]
fn test_retry_warning_names_failure_source() {
    let mut results = vec![
        Err(ProtocolError::CrcError { remainder: 0x1234 }),
        Err(ProtocolError::Timeout),
    ]
    .into_iter();

    let ((value, attempts), logs) = with_captured_logs(|| {
        retry_with_backoff(1, Duration::ZERO, || results.next().unwrap())
    });

    assert!(matches!(value, Err(ProtocolError::Timeout)));
    assert_eq!(attempts, 2);
    assert!(logs.contains("frame failure"), "{logs}");
    assert!(!logs.contains("line failure"), "{logs}");
}

#[test]
fn test_exchange_ignores_bytes_after_terminator() {
    let mut frame = energy_frame();
    frame.extend_from_slice(&[0xaa, 0xbb]);
    let mut mock = MockSerial::with_response(frame);
    assert!(exchange(&mut mock, 0x3c).is_ok());
}

#[test]
fn test_exchange_timeout() {
    let mut mock = MockSerial::with_response(vec![0x40, 0x3f, 0x10]);
    assert!(matches!(exchange(&mut mock, 0x3c), Err(ProtocolError::Timeout)));
}

#[test]
fn test_exchange_write_failure() {
    let mut mock = MockSerial::with_response(energy_frame());
    mock.fail_on_send = true;
    assert!(matches!(
        exchange(&mut mock, 0x3c),
        Err(ProtocolError::IoError(_))
    ));
}

#[test]
fn test_exchange_wrong_register_echo() {
    let mut mock = MockSerial::with_response(energy_frame());
    assert!(matches!(
        exchange(&mut mock, 0x44),
        Err(ProtocolError::MalformedResponse { .. })
    ));
}

#[test]
fn test_exchange_corrupted_frame() {
    let mut frame = energy_frame();
    frame[5] ^= 0x01;
    let mut mock = MockSerial::with_response(frame);
    assert!(matches!(
        exchange(&mut mock, 0x3c),
        Err(ProtocolError::CrcError { .. })
    ));
}

#[test]
fn test_client_retries_until_good_frame() {
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = opened.clone();

    let client = MeterClient::with_opener(move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        let frame = if attempt < 2 {
            vec![0x40, 0x0d]
        } else {
            energy_frame()
        };
        Ok(Box::new(MockSerial::with_response(frame)) as Box<dyn MeterChannel>)
    });

    let (value, attempts) = client.read_register_with_retry(0x3c, 5, Duration::ZERO);
    assert_eq!(value.unwrap().value, 12345.0);
    assert_eq!(attempts, 3);
    assert_eq!(opened.load(Ordering::SeqCst), 3);
}

#[test]
fn test_client_gives_up_after_retries() {
    let client = MeterClient::with_opener(|| {
        Ok(Box::new(MockSerial::with_response(Vec::new())) as Box<dyn MeterChannel>)
    });

    let (value, attempts) = client.read_register_with_retry(0x3c, 2, Duration::from_millis(1));
    assert!(matches!(value, Err(ProtocolError::Timeout)));
    assert_eq!(attempts, 3);
}

#[test]
fn test_client_serializes_line_access() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    struct Guarded {
        inner: MockSerial,
        in_flight: Arc<AtomicUsize>,
    }

    impl Drop for Guarded {
        fn drop(&mut self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Read for Guarded {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(1));
            self.inner.read(buf)
        }
    }

    impl Write for Guarded {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl MeterChannel for Guarded {
        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let client = {
        let in_flight = in_flight.clone();
        let max_seen = max_seen.clone();
        MeterClient::with_opener(move || {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(Guarded {
                inner: MockSerial::with_response(energy_frame()),
                in_flight: in_flight.clone(),
            }) as Box<dyn MeterChannel>)
        })
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            std::thread::spawn(move || client.read_register(0x3c).is_ok())
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}
