//! Reader configuration.

use crate::error::ReaderError;
use crate::frame::PACKET_LEN;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SOCKET_HOST: &str = "0.0.0.0";
pub const DEFAULT_SOCKET_PORT: u16 = 8234;
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;
pub const DEFAULT_MAX_PENDING_BYTES: usize = 4096;
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(ReaderError::InvalidConfig(format!("unknown parity '{}'", other))),
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl FromStr for StopBits {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(StopBits::One),
            "2" => Ok(StopBits::Two),
            other => Err(ReaderError::InvalidConfig(format!("unsupported stop bits '{}'", other))),
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl FromStr for DataBits {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5" => Ok(DataBits::Five),
            "6" => Ok(DataBits::Six),
            "7" => Ok(DataBits::Seven),
            "8" => Ok(DataBits::Eight),
            other => Err(ReaderError::InvalidConfig(format!("unsupported byte size '{}'", other))),
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(data_bits: DataBits) -> Self {
        match data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Serial line parameters.
pub struct SerialSettings {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,
    pub baud_rate: u32,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub data_bits: DataBits,
    /// Poll timeout for a single read
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            stop_bits: StopBits::One,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            read_timeout: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// TCP listener parameters. A single client is accepted.
pub struct SocketSettings {
    pub host: String,
    pub port: u16,
    /// Read timeout applied to the accepted client
    pub read_timeout: Duration,
}

impl Default for SocketSettings {
    fn default() -> Self {
        SocketSettings {
            host: DEFAULT_SOCKET_HOST.to_string(),
            port: DEFAULT_SOCKET_PORT,
            read_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Serial(SerialSettings),
    Socket(SocketSettings),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Serial(SerialSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Everything needed to build and run a reader.
pub struct ReaderConfig {
    pub transport: TransportConfig,
    /// Generate packets locally instead of reading the link
    pub synthetic_mode: bool,
    /// Number of recent packets the failure rate is computed over
    pub rolling_window_capacity: usize,
    /// Unterminated text beyond this many bytes is discarded
    pub max_pending_bytes: usize,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            transport: TransportConfig::default(),
            synthetic_mode: false,
            rolling_window_capacity: DEFAULT_WINDOW_CAPACITY,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ReaderConfig {
    pub fn serial(settings: SerialSettings) -> Self {
        ReaderConfig {
            transport: TransportConfig::Serial(settings),
            ..Default::default()
        }
    }

    pub fn socket(settings: SocketSettings) -> Self {
        ReaderConfig {
            transport: TransportConfig::Socket(settings),
            ..Default::default()
        }
    }

    pub fn with_synthetic_mode(mut self, enabled: bool) -> Self {
        self.synthetic_mode = enabled;
        self
    }

    pub fn with_window_capacity(mut self, capacity: usize) -> Self {
        self.rolling_window_capacity = capacity;
        self
    }

    pub fn with_max_pending_bytes(mut self, limit: usize) -> Self {
        self.max_pending_bytes = limit;
        self
    }

    pub fn validate(&self) -> Result<(), ReaderError> {
        if self.rolling_window_capacity == 0 {
            return Err(ReaderError::InvalidConfig(
                "rolling window capacity must be at least 1".to_string(),
            ));
        }
        if self.max_pending_bytes < PACKET_LEN {
            return Err(ReaderError::InvalidConfig(format!(
                "max pending bytes must be at least {}, got {}",
                PACKET_LEN, self.max_pending_bytes
            )));
        }
        if self.event_capacity == 0 {
            return Err(ReaderError::InvalidConfig(
                "event capacity must be at least 1".to_string(),
            ));
        }
        match &self.transport {
            TransportConfig::Serial(s) if s.port.is_empty() => Err(ReaderError::InvalidConfig(
                "serial port path is empty".to_string(),
            )),
            TransportConfig::Serial(s) if s.baud_rate == 0 => Err(ReaderError::InvalidConfig(
                "baud rate must be non-zero".to_string(),
            )),
            TransportConfig::Socket(s) if s.host.is_empty() => Err(ReaderError::InvalidConfig(
                "socket host is empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
