//! Serial link to the Arduino bridge.
use std::{
    fmt,
    io::{self, Read, Write},
    str::FromStr,
    time::Duration,
};

use serialport::{SerialPort, SerialPortType};

use super::Transport;

/// Opening the port resets most Arduinos, and the sketch only greets us
/// once its bootloader has given up, so reads get a generous timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Line rate of the bridge. Must match what the sketch was built with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Baudrate(pub u32);

impl Default for Baudrate {
    fn default() -> Self {
        Baudrate(1_000_000)
    }
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        value.0
    }
}

impl fmt::Display for Baudrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            n if n >= 1_000_000 && n % 1_000_000 == 0 => write!(f, "{}m", n / 1_000_000),
            n if n >= 1_000 && n % 1_000 == 0 => write!(f, "{}k", n / 1_000),
            n => write!(f, "{}", n),
        }
    }
}

/// Accepts plain numbers (`115200`, `1_000_000`) and `k`/`m` suffixes (`1m`).
impl FromStr for Baudrate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().to_ascii_lowercase().replace('_', "");
        let (number, scale) = match digits.as_bytes().last() {
            Some(b'k') => (&digits[..digits.len() - 1], 1_000),
            Some(b'm') => (&digits[..digits.len() - 1], 1_000_000),
            _ => (&digits[..], 1),
        };
        number
            .parse::<u32>()
            .ok()
            .and_then(|n| n.checked_mul(scale))
            .filter(|&n| n > 0)
            .map(Baudrate)
            .ok_or_else(|| format!("invalid baud rate {:?}", s))
    }
}

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Names of the serial ports on this machine, USB adapters first.
    pub fn scan_ports() -> io::Result<Vec<String>> {
        let mut ports = serialport::available_ports()?;
        ports.sort_by_key(|p| !matches!(p.port_type, SerialPortType::UsbPort(_)));
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn open(port: &str, baudrate: Baudrate) -> io::Result<Self> {
        log::info!("Connecting to serial port {} at {} baud", port, baudrate);
        let serial_port = serialport::new(port, baudrate.into())
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(SerialTransport { serial_port })
    }
}

impl Transport for SerialTransport {
    fn write_raw(&mut self, raw: &[u8]) -> io::Result<()> {
        self.serial_port.write_all(raw)?;
        self.serial_port.flush()
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.serial_port.read_exact(buf)
    }
}
