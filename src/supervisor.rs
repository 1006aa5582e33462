use crate::config::{ReaderConfig, TransportConfig};
use crate::engine::{EngineOptions, EngineState, ReaderEngine, ReaderEvent};
use crate::error::ReaderError;
use crate::transport;
use crossbeam_channel::Receiver;
use log::info;
use std::time::Duration;

/// Front end that builds the configured transport and runs a [`ReaderEngine`] on it.
///
/// A fresh transport is created for every [`start`](Self::start), so a supervisor can be stopped
/// and started again.
pub struct ReaderSupervisor {
    config: ReaderConfig,
    engine: ReaderEngine,
}

impl ReaderSupervisor {
    /// # Errors
    /// Returns [`ReaderError::InvalidConfig`] if the configuration is rejected.
    pub fn new(config: ReaderConfig) -> Result<Self, ReaderError> {
        config.validate()?;
        match &config.transport {
            TransportConfig::Serial(s) => info!("Serial reader selected for {}", s.port),
            TransportConfig::Socket(s) => info!("Socket reader selected for {}:{}", s.host, s.port),
        }
        let engine = ReaderEngine::new(EngineOptions::from(&config));
        Ok(ReaderSupervisor { config, engine })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn start(&mut self) -> Result<(), ReaderError> {
        let transport = transport::from_config(&self.config.transport);
        info!("Starting reader on {}", transport.describe());
        self.engine.start(transport)
    }

    pub fn stop(&mut self) -> Result<(), ReaderError> {
        self.engine.stop()
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Receiver for events published from the reader's worker thread.
    pub fn subscribe(&self) -> Receiver<ReaderEvent> {
        self.engine.events()
    }

    pub fn recv_event(&self) -> Result<ReaderEvent, ReaderError> {
        self.engine.recv_event()
    }

    pub fn try_recv_event(&self) -> Result<Option<ReaderEvent>, ReaderError> {
        self.engine.try_recv_event()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<Option<ReaderEvent>, ReaderError> {
        self.engine.recv_event_timeout(timeout)
    }

    pub fn dropped_count(&self) -> u64 {
        self.engine.dropped_count()
    }

    pub fn synthetic_mode(&self) -> bool {
        self.engine.synthetic_mode()
    }

    /// Enables or disables generated data. Buffered bytes and pending transport input are
    /// discarded either way.
    pub fn set_synthetic_mode(&mut self, enabled: bool) {
        self.config.synthetic_mode = enabled;
        self.engine.set_synthetic_mode(enabled);
    }

    pub fn send_command(&self, command: impl Into<Vec<u8>>) -> Result<(), ReaderError> {
        self.engine.send_command(command)
    }
}
