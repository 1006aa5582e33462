use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
/// Errors that can occur while reading a telemetry link.
pub enum ReaderError {
    #[error("Connection setup error: {0}")]
    ConnectionSetup(String),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Transport read error: {0}")]
    TransportRead(String),
    #[error("Peer disconnected")]
    PeerDisconnected,
    #[error("Pending data overflow: {pending} bytes without a terminator (limit {limit})")]
    PendingOverflow { pending: usize, limit: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Reader is already running")]
    AlreadyRunning,
    #[error("Reader is not running")]
    NotRunning,
    #[error("Channel receive error: {0}")]
    ChannelReceive(#[from] crossbeam_channel::RecvError),
    #[error("Thread communication error: {0}")]
    ThreadComm(String),
}

impl ReaderError {
    /// Whether this error ends the current session.
    ///
    /// Overflow of unterminated text is recovered from by discarding the pending bytes;
    /// everything raised by the transport itself is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReaderError::PendingOverflow { .. })
    }
}
