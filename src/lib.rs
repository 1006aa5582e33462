//! # libtelem
//!
//! This crate receives telemetry from a device that interleaves fixed-size, checksummed binary
//! packets with newline-terminated text reports on a serial port or a TCP socket.
//! It handles framing, resynchronization and checksum validation on a background thread and
//! exposes a thread-safe, channel-based API for the resulting events.
//!
//! ```no_run
//! use libtelem::{ReaderConfig, ReaderEvent, ReaderSupervisor, SocketSettings};
//!
//! # fn main() -> Result<(), libtelem::ReaderError> {
//! let mut reader = ReaderSupervisor::new(ReaderConfig::socket(SocketSettings::default()))?;
//! reader.start()?;
//! while let Ok(event) = reader.recv_event() {
//!     if let ReaderEvent::DataPacketReceived(raw) = event {
//!         println!("{} bytes", raw.len());
//!     }
//! }
//! reader.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod monitor;
pub mod supervisor;
pub mod synthetic;
pub mod transport;

pub use checksum::{ChecksumPair, PacketOutcome};
pub use config::{DataBits, Parity, ReaderConfig, SerialSettings, SocketSettings, StopBits, TransportConfig};
pub use engine::{EngineOptions, EngineState, ReaderEngine, ReaderEvent};
pub use error::ReaderError;
pub use frame::{DataPacket, Frame, FrameParser, InfoReport, ParseOutcome, MAGIC_BYTES, NUM_CHANNELS, PACKET_LEN};
pub use monitor::FailureRateMonitor;
pub use supervisor::ReaderSupervisor;
pub use synthetic::SyntheticSignalGenerator;
pub use transport::{CloseHandle, ReadOutcome, SerialTransport, SocketTransport, Transport, TransportState};
