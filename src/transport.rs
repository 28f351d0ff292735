//! Serial link to the winder firmware
//!
//! Opening the port toggles DTR, which resets the Arduino and re-runs its
//! setup(). `SerialTransport::open` waits out that reset before returning.

use log::{debug, info, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Result, WinderError};

pub const DEFAULT_BAUD_RATE: u32 = 38_400;
/// Highest port index tried when probing
pub const MAX_PORT_INDEX: u8 = 15;
/// Longest reply line accepted before giving up on the newline
pub const MAX_LINE_LEN: usize = 256;

/// Byte channel the protocol core talks through
pub trait Transport: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read one newline-terminated line, without the line ending.
    /// `None` blocks until a line arrives or the channel fails.
    fn read_line(&mut self, timeout: Option<Duration>) -> io::Result<String>;

    /// Drop any received bytes not yet consumed.
    fn discard_input(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_bytes(bytes)
    }

    fn read_line(&mut self, timeout: Option<Duration>) -> io::Result<String> {
        (**self).read_line(timeout)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Which serial port to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelector {
    /// Port number, e.g. 3 for COM3
    Index(u8),
    /// Explicit device path
    Path(String),
    /// Try indices 0..=15 in order
    Auto,
}

impl PortSelector {
    /// Numbers become indices, anything else a path, empty or "auto" probes.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return PortSelector::Auto;
        }
        match s.parse::<u8>() {
            Ok(n) => PortSelector::Index(n),
            Err(_) => PortSelector::Path(s.to_string()),
        }
    }
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSelector::Index(n) => write!(f, "port #{}", n),
            PortSelector::Path(p) => write!(f, "{}", p),
            PortSelector::Auto => write!(f, "auto (0-{})", MAX_PORT_INDEX),
        }
    }
}

/// Device paths a port index may refer to on this platform
pub fn candidate_paths(index: u8) -> Vec<String> {
    if cfg!(target_os = "windows") {
        vec![format!("COM{}", index)]
    } else {
        vec![format!("/dev/ttyACM{}", index), format!("/dev/ttyUSB{}", index)]
    }
}

/// Serial line settings
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Wait after opening while the firmware resets
    pub settle: Duration,
    /// Timeout of a single serialport read call
    pub poll_interval: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            settle: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Append received bytes, failing once more than `MAX_LINE_LEN` bytes
/// arrive without a newline. The oversized data is dropped.
pub fn buffer_chunk(pending: &mut Vec<u8>, chunk: &[u8]) -> io::Result<()> {
    pending.extend_from_slice(chunk);
    if pending.len() > MAX_LINE_LEN && !pending.contains(&b'\n') {
        let len = pending.len();
        pending.clear();
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} bytes received without a line ending", len),
        ));
    }
    Ok(())
}

/// Take the first complete line out of `pending`, stripping `\r\n`.
pub fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let pos = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=pos).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Serial port transport
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    port_path: String,
    pending: Vec<u8>,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_path", &self.port_path)
            .field("open", &self.port.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SerialTransport {
    pub fn open(selector: &PortSelector, settings: &LinkSettings) -> Result<Self> {
        let candidates: Vec<String> = match selector {
            PortSelector::Path(p) => vec![p.clone()],
            PortSelector::Index(n) => {
                if *n > MAX_PORT_INDEX {
                    return Err(WinderError::Connection(format!(
                        "Port index {} out of range (0-{})",
                        n, MAX_PORT_INDEX
                    )));
                }
                candidate_paths(*n)
            }
            PortSelector::Auto => (0..=MAX_PORT_INDEX).flat_map(candidate_paths).collect(),
        };

        let mut failures = Vec::new();
        for path in &candidates {
            match Self::open_path(path, settings) {
                Ok(port) => {
                    info!("Connected to {} at {} baud", path, settings.baud_rate);
                    // Arduino reset delay
                    std::thread::sleep(settings.settle);
                    return Ok(Self {
                        port: Some(port),
                        port_path: path.clone(),
                        pending: Vec::new(),
                    });
                }
                Err(e) => {
                    debug!("Could not open {}: {}", path, e);
                    failures.push(format!("{}: {}", path, e));
                }
            }
        }

        Err(WinderError::Connection(format!(
            "No winder found on {} (tried {})",
            selector,
            failures.join("; ")
        )))
    }

    fn open_path(path: &str, settings: &LinkSettings) -> serialport::Result<Box<dyn SerialPort>> {
        serialport::new(path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(settings.poll_interval)
            .open()
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Port not connected"))
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_line(&mut self, timeout: Option<Duration>) -> io::Result<String> {
        let start = Instant::now();
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return Ok(line);
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "No reply line received"));
                }
            }
            let port = self.port_mut()?;
            match port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => buffer_chunk(&mut self.pending, &chunk[..n])?,
                // Per-call poll timeout; keep waiting for the line
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn close(&mut self) -> io::Result<()> {
        match self.port.take() {
            Some(port) => {
                drop(port);
                info!("Closed {}", self.port_path);
            }
            None => warn!("{} already closed", self.port_path),
        }
        Ok(())
    }
}
