//! Serial port handling
//!
//! Port discovery, the [`Link`] abstraction over an open port, and the
//! retrying opener that turns a port name into a settled [`SerialLink`].

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{LinkConfig, ProtocolError, SerialLink};

const BUSY_HINT: &str = "Close any other program holding the port (serial monitor, IDE, \
                         another accdump instance) and try again";

const IO_HINT: &str = "The logger probably reset while the port was opening; wait a few \
                       seconds, replug the USB cable if needed, and try again";

/// USB-UART bridges found on the supported M5 boards
const LOGGER_BRIDGES: &[(u16, u16)] = &[
    (0x0403, 0x6001), // FTDI FT232R
    (0x0403, 0x6015), // FTDI FT231X
    (0x1a86, 0x55d4), // WCH CH9102
    (0x1a86, 0x7523), // WCH CH340
    (0x10c4, 0xea60), // Silicon Labs CP210x
    (0x303a, 0x1001), // Espressif USB-JTAG/serial
];

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Whether the port sits behind a USB bridge used by the logger boards
    pub fn is_likely_logger(&self) -> bool {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => LOGGER_BRIDGES.contains(&(vid, pid)),
            _ => false,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key: ttyACM* first, then ttyUSB*, each numerically, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // udev can lag behind freshly reset boards; pick up raw device nodes too
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// A byte channel to the logger.
///
/// Reads follow `serialport` semantics: a read that sees no data before the
/// timeout fails with [`io::ErrorKind::TimedOut`].
pub trait Link: Read + Write {
    /// Current read timeout
    fn timeout(&self) -> Duration;

    /// Change the read timeout
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop any bytes already received but not yet read
    fn clear_input(&mut self) -> io::Result<()>;

    /// Drive DTR/RTS
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn timeout(&self) -> Duration {
        SerialPort::timeout(self.as_ref())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        SerialPort::set_timeout(self.as_mut(), timeout).map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()> {
        self.write_data_terminal_ready(dtr)
            .map_err(io::Error::from)?;
        self.write_request_to_send(rts).map_err(io::Error::from)
    }
}

/// Something that can open a named port at a given baud rate
pub trait PortOpener {
    /// The link type produced
    type Link: Link;

    /// Open `port` once, without retries or settling
    fn open(&self, port: &str, baud: u32, timeout: Duration)
        -> Result<Self::Link, serialport::Error>;
}

/// Opens real serial ports through the `serialport` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    type Link = Box<dyn SerialPort>;

    fn open(
        &self,
        port: &str,
        baud: u32,
        timeout: Duration,
    ) -> Result<Self::Link, serialport::Error> {
        // 8N1, no flow control; exclusive access is the crate default on unix
        serialport::new(port, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
    }
}

/// Map a failed open to a busy / I/O / not-found / other error with a hint
pub fn classify_open_error(port: &str, err: &serialport::Error) -> ProtocolError {
    let detail = err.description.clone();
    let lower = detail.to_lowercase();

    // Windows reports a held COM port as "Access is denied"
    let busy = ["busy", "access is denied", "in use", "temporarily unavailable"];
    if busy.iter().any(|s| lower.contains(s)) {
        return ProtocolError::PortBusy {
            port: port.to_string(),
            detail,
            hint: BUSY_HINT,
        };
    }

    let io_markers = [
        "input/output",
        "i/o error",
        "broken pipe",
        "device not configured",
        "device disconnected",
    ];
    if io_markers.iter().any(|s| lower.contains(s)) {
        return ProtocolError::PortIo {
            port: port.to_string(),
            detail,
            hint: IO_HINT,
        };
    }

    match err.kind() {
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ProtocolError::PortNotFound(port.to_string())
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => ProtocolError::PortOpen {
            port: port.to_string(),
            detail: format!("{detail} (check that your user may access serial devices)"),
        },
        serialport::ErrorKind::Io(_) => ProtocolError::PortIo {
            port: port.to_string(),
            detail,
            hint: IO_HINT,
        },
        _ => ProtocolError::PortOpen {
            port: port.to_string(),
            detail,
        },
    }
}

/// Open `port` at `baud` with bounded retries, then let the device settle.
///
/// After the open succeeds DTR and RTS are released so the auto-reset
/// circuit does not hold the board in reset, the configured settle delay is
/// waited out (boot banners arrive here) and the input buffer is discarded.
pub fn open_link<O: PortOpener>(
    opener: &O,
    port: &str,
    baud: u32,
    config: &LinkConfig,
) -> Result<SerialLink<O::Link>, ProtocolError> {
    let attempts = config.open_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        tracing::debug!(port, baud, attempt, attempts, "opening serial port");
        match opener.open(port, baud, config.read_timeout()) {
            Ok(mut raw) => {
                if let Err(e) = raw.set_control_lines(false, false) {
                    tracing::debug!(port, error = %e, "could not release DTR/RTS (continuing)");
                }
                std::thread::sleep(config.settle_delay());
                raw.clear_input()?;
                return Ok(SerialLink::new(raw, port, baud));
            }
            Err(e) => {
                tracing::warn!(port, baud, attempt, error = %e, "open failed");
                last_err = Some(e);
                if attempt < attempts {
                    std::thread::sleep(config.open_retry_delay());
                }
            }
        }
    }

    Err(match last_err {
        Some(e) => classify_open_error(port, &e),
        None => ProtocolError::PortNotFound(port.to_string()),
    })
}
