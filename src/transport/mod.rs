//! Byte sources the reader can be attached to.
//!
//! A [`Transport`] is driven from the reader's worker thread only. The one operation another
//! thread may perform is closing it, through the [`CloseHandle`] taken before the worker starts.

use crate::config::TransportConfig;
use crate::error::ReaderError;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

mod serial;
mod socket;

pub use serial::SerialTransport;
pub use socket::SocketTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unconnected,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a single poll of the transport produced.
pub enum ReadOutcome {
    /// `n` bytes were written to the front of the buffer.
    Data(usize),
    /// Nothing arrived within the poll timeout.
    Idle,
    /// The other side went away, or the transport was closed.
    Ended,
}

/// A connection the reader pulls bytes from.
pub trait Transport: Send {
    /// Acquires the underlying resource. Fails with [`ReaderError::ConnectionSetup`].
    fn setup(&mut self) -> Result<(), ReaderError>;

    /// Reads whatever is available, waiting at most the configured poll timeout.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ReaderError>;

    /// Drops any input queued but not yet read.
    fn discard_input(&mut self) -> Result<(), ReaderError>;

    /// Sends bytes to the device.
    fn write_all(&mut self, data: &[u8]) -> Result<(), ReaderError>;

    /// Releases all resources. Calling it again has no effect.
    fn close(&mut self);

    /// Handle that can close this transport from another thread.
    fn close_handle(&self) -> CloseHandle;

    fn state(&self) -> TransportState;

    /// Short human-readable name of the link, used in log messages.
    fn describe(&self) -> String;
}

type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// Cross-thread close signal for a transport.
///
/// Closing sets a shared flag the transport checks before every blocking step, then runs an
/// optional hook that interrupts a read already in progress.
#[derive(Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
    hook: Option<CloseHook>,
}

impl CloseHandle {
    pub fn new(closed: Arc<AtomicBool>) -> Self {
        CloseHandle { closed, hook: None }
    }

    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle")
            .field("closed", &self.is_closed())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Builds the transport variant selected by `config`, not yet set up.
pub fn from_config(config: &TransportConfig) -> Box<dyn Transport> {
    match config {
        TransportConfig::Serial(settings) => Box::new(SerialTransport::new(settings.clone())),
        TransportConfig::Socket(settings) => Box::new(SocketTransport::new(settings.clone())),
    }
}
