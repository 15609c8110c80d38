//! Serial port handling
//!
//! Provides low-level serial port access for the optical head.
//! The meter talks 1200 baud, 8 data bits, no parity, 2 stop bits.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Helper used to sort port names so that ttyUSB* (the usual optical head
/// adapters) come first, sorted numerically, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    (1, 0, basename.to_string())
}

/// List all available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open a serial port configured for the meter
pub fn open_port(name: &str, timeout: Duration) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let mut port = serialport::new(name, DEFAULT_BAUD_RATE)
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    configure_port(port.as_mut())?;
    tracing::debug!("opened {} at {} baud", name, DEFAULT_BAUD_RATE);
    Ok(port)
}

/// Configure a serial port for the meter (8N2, no flow control)
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::Two)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec!["/dev/ttyS0", "/dev/ttyUSB10", "/dev/ttyUSB1", "/dev/ttyAMA0"];
        let mut sorted = names.clone();
        sorted.sort_by_key(|n| port_sort_key(n));

        assert_eq!(
            sorted,
            vec!["/dev/ttyUSB1", "/dev/ttyUSB10", "/dev/ttyAMA0", "/dev/ttyS0"]
        );
    }

    #[test]
    fn test_open_missing_port_is_serial_error() {
        let err = open_port("/dev/does-not-exist-kamstrup", Duration::from_millis(10))
            .err()
            .expect("opening a missing port should fail");
        assert!(matches!(err, ProtocolError::SerialError(_)));
    }
}
