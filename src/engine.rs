//! The reader worker: pulls bytes from a transport, frames them and publishes events.

use crate::config::ReaderConfig;
use crate::error::ReaderError;
use crate::frame::{magic_prefix_suffix_len, Frame, FrameParser};
use crate::monitor::FailureRateMonitor;
use crate::synthetic::SyntheticSignalGenerator;
use crate::transport::{CloseHandle, ReadOutcome, Transport};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use log::{debug, error, info, warn};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_CHUNK_SIZE: usize = 1024;
const SYNTHETIC_INTERVAL: Duration = Duration::from_millis(10);
const IDLE_INTERVAL: Duration = Duration::from_millis(1);
/// How long a connection or error event may wait for room in a full channel.
const LIFECYCLE_SEND_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
/// Events published by the reader. They are sent from the worker thread.
pub enum ReaderEvent {
    ConnectionStatusChanged(bool),
    ErrorOccurred(String),
    /// Raw bytes of a packet that passed its checksum
    DataPacketReceived(Vec<u8>),
    /// Same packet with its capture time in seconds since the Unix epoch
    TimedDataPacketReceived { raw: Vec<u8>, timestamp: f64 },
    InfoReportReceived(Vec<u8>),
    /// Checksum failure percentage over the rolling window
    FailureRateUpdated(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    Connecting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Errored = 5,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Connecting,
            2 => EngineState::Running,
            3 => EngineState::Stopping,
            4 => EngineState::Stopped,
            5 => EngineState::Errored,
            _ => EngineState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Engine tuning, usually taken from a [`ReaderConfig`].
pub struct EngineOptions {
    pub window_capacity: usize,
    pub max_pending_bytes: usize,
    pub event_capacity: usize,
    pub synthetic_mode: bool,
}

impl From<&ReaderConfig> for EngineOptions {
    fn from(config: &ReaderConfig) -> Self {
        EngineOptions {
            window_capacity: config.rolling_window_capacity,
            max_pending_bytes: config.max_pending_bytes,
            event_capacity: config.event_capacity,
            synthetic_mode: config.synthetic_mode,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions::from(&ReaderConfig::default())
    }
}

/// Flags shared between the engine handle and its worker.
#[derive(Debug, Default)]
struct Control {
    stop: AtomicBool,
    synthetic: AtomicBool,
    discard: AtomicBool,
    state: AtomicU8,
    dropped: AtomicU64,
}

impl Control {
    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Threaded reader bound to one transport per run.
///
/// [`start`](Self::start) spawns a worker thread that owns the transport, the byte buffer and the
/// failure-rate window. Events are delivered through a bounded channel; use
/// [`recv_event`](Self::recv_event), [`try_recv_event`](Self::try_recv_event) or a receiver from
/// [`events`](Self::events). When the subscriber lags and the channel fills, data events are
/// dropped and counted rather than stalling the worker.
pub struct ReaderEngine {
    options: EngineOptions,
    control: Arc<Control>,
    event_tx: Sender<ReaderEvent>,
    event_rx: Receiver<ReaderEvent>,
    command_tx: Sender<Vec<u8>>,
    command_rx: Receiver<Vec<u8>>,
    close_handle: Option<CloseHandle>,
    reader_thread: Option<JoinHandle<()>>,
}

impl ReaderEngine {
    pub fn new(options: EngineOptions) -> Self {
        let (event_tx, event_rx) = bounded(options.event_capacity.max(1));
        let (command_tx, command_rx) = unbounded();
        let control = Arc::new(Control::default());
        control.synthetic.store(options.synthetic_mode, Ordering::SeqCst);
        ReaderEngine {
            options,
            control,
            event_tx,
            event_rx,
            command_tx,
            command_rx,
            close_handle: None,
            reader_thread: None,
        }
    }

    /// Spawns the worker and hands it `transport`, which it sets up before reading.
    ///
    /// # Errors
    /// Returns [`ReaderError::AlreadyRunning`] if a previous run has not finished.
    pub fn start(&mut self, transport: Box<dyn Transport>) -> Result<(), ReaderError> {
        if let Some(handle) = self.reader_thread.take() {
            if !handle.is_finished() {
                self.reader_thread = Some(handle);
                return Err(ReaderError::AlreadyRunning);
            }
            if handle.join().is_err() {
                warn!("Previous reader thread had panicked");
            }
        }

        while self.command_rx.try_recv().is_ok() {}
        self.control.stop.store(false, Ordering::SeqCst);
        self.control.discard.store(false, Ordering::SeqCst);
        self.control.set_state(EngineState::Connecting);
        self.close_handle = Some(transport.close_handle());

        let worker = Worker {
            transport,
            parser: FrameParser::new(),
            monitor: FailureRateMonitor::new(self.options.window_capacity),
            generator: SyntheticSignalGenerator::new(),
            buffer: Vec::with_capacity(READ_CHUNK_SIZE),
            max_pending: self.options.max_pending_bytes,
            control: Arc::clone(&self.control),
            events: EventSink {
                tx: self.event_tx.clone(),
                control: Arc::clone(&self.control),
            },
            commands: self.command_rx.clone(),
        };

        let spawned = thread::Builder::new()
            .name("telem-reader".to_string())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.reader_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.control.set_state(EngineState::Stopped);
                self.close_handle = None;
                Err(ReaderError::ThreadComm(format!("Failed to spawn reader thread: {}", e)))
            }
        }
    }

    /// Stop the worker and close the transport.
    ///
    /// Returns only after the worker has exited, so no reads happen afterwards.
    pub fn stop(&mut self) -> Result<(), ReaderError> {
        let Some(handle) = self.reader_thread.take() else {
            return Ok(());
        };
        info!("Stopping reader...");
        self.control.stop.store(true, Ordering::SeqCst);
        if let Some(close) = self.close_handle.take() {
            close.close();
        }
        if handle.join().is_err() {
            self.control.set_state(EngineState::Stopped);
            return Err(ReaderError::ThreadComm("Reader thread panicked".to_string()));
        }
        info!("Reader stopped.");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.reader_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// A receiver for the event stream. Receivers share one queue, so each event goes to
    /// whichever receiver takes it first.
    pub fn events(&self) -> Receiver<ReaderEvent> {
        self.event_rx.clone()
    }

    /// Receive the next event, blocking until one is available.
    pub fn recv_event(&self) -> Result<ReaderEvent, ReaderError> {
        Ok(self.event_rx.recv()?)
    }

    /// Try to receive an event without blocking.
    pub fn try_recv_event(&self) -> Result<Option<ReaderEvent>, ReaderError> {
        match self.event_rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(ReaderError::ThreadComm("Event channel disconnected".to_string()))
            }
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<Option<ReaderEvent>, ReaderError> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ReaderError::ThreadComm("Event channel disconnected".to_string()))
            }
        }
    }

    /// Number of events dropped because the channel was full.
    pub fn dropped_count(&self) -> u64 {
        self.control.dropped.load(Ordering::Relaxed)
    }

    pub fn synthetic_mode(&self) -> bool {
        self.control.synthetic.load(Ordering::SeqCst)
    }

    /// Switches between generated and real data.
    ///
    /// The worker discards its buffered bytes and the transport's pending input before the next
    /// iteration, so stale link data cannot be framed together with fresh data.
    pub fn set_synthetic_mode(&self, enabled: bool) {
        info!("Synthetic mode {}", if enabled { "enabled" } else { "disabled" });
        self.control.discard.store(true, Ordering::SeqCst);
        self.control.synthetic.store(enabled, Ordering::SeqCst);
    }

    /// Queues bytes to be written to the device between reads.
    pub fn send_command(&self, command: impl Into<Vec<u8>>) -> Result<(), ReaderError> {
        if !matches!(self.state(), EngineState::Connecting | EngineState::Running) {
            return Err(ReaderError::NotRunning);
        }
        self.command_tx
            .send(command.into())
            .map_err(|_| ReaderError::ThreadComm("Command channel closed".to_string()))
    }
}

impl Drop for ReaderEngine {
    fn drop(&mut self) {
        if self.reader_thread.is_some() {
            if let Err(e) = self.stop() {
                error!("Error stopping reader thread during drop: {:?}", e);
            }
        }
    }
}

struct EventSink {
    tx: Sender<ReaderEvent>,
    control: Arc<Control>,
}

impl EventSink {
    /// Publishes a data event, dropping it if the subscriber is behind.
    fn emit(&self, event: ReaderEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.control.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Event channel full, {} events dropped so far", dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => debug!("Event receiver dropped"),
        }
    }

    /// Publishes a connection or error event, waiting briefly for room.
    fn emit_lifecycle(&self, event: ReaderEvent) {
        if self.tx.send_timeout(event, LIFECYCLE_SEND_TIMEOUT).is_err() {
            self.control.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Lifecycle event dropped, subscriber not draining events");
        }
    }
}

struct Worker {
    transport: Box<dyn Transport>,
    parser: FrameParser,
    monitor: FailureRateMonitor,
    generator: SyntheticSignalGenerator,
    buffer: Vec<u8>,
    max_pending: usize,
    control: Arc<Control>,
    events: EventSink,
    commands: Receiver<Vec<u8>>,
}

impl Worker {
    fn run(mut self) {
        info!("Reader thread started on {}.", self.transport.describe());

        if let Err(e) = self.transport.setup() {
            if self.control.stop_requested() {
                info!("Setup cancelled by stop request");
            } else {
                error!("{}", e);
                self.control.set_state(EngineState::Errored);
                self.events.emit_lifecycle(ReaderEvent::ErrorOccurred(e.to_string()));
            }
            self.shutdown();
            return;
        }

        self.control.set_state(EngineState::Running);
        self.events.emit_lifecycle(ReaderEvent::ConnectionStatusChanged(true));

        if let Some(fault) = self.read_loop() {
            error!("Reader stopped on error: {}", fault);
            self.control.set_state(EngineState::Errored);
            self.events.emit_lifecycle(ReaderEvent::ErrorOccurred(fault.to_string()));
        }
        self.shutdown();
    }

    /// Runs until a stop request or a fatal transport error, which is returned.
    fn read_loop(&mut self) -> Option<ReaderError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while !self.control.stop_requested() {
            // Read the mode before applying a discard so a toggle is never seen half-applied.
            let synthetic = self.control.synthetic.load(Ordering::SeqCst);
            self.apply_requests();

            if synthetic {
                let packet = self.generator.next_packet();
                self.buffer.extend_from_slice(packet.as_bytes());
                self.drain_buffer();
                thread::sleep(SYNTHETIC_INTERVAL);
                continue;
            }

            match self.transport.read_available(&mut chunk) {
                Ok(ReadOutcome::Data(n)) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    self.drain_buffer();
                }
                Ok(ReadOutcome::Idle) => thread::sleep(IDLE_INTERVAL),
                Ok(ReadOutcome::Ended) if self.control.stop_requested() => return None,
                Ok(ReadOutcome::Ended) => return Some(ReaderError::PeerDisconnected),
                Err(_) if self.control.stop_requested() => return None,
                Err(e) => return Some(e),
            }
        }
        None
    }

    fn apply_requests(&mut self) {
        if self.control.discard.swap(false, Ordering::SeqCst) {
            debug!("Discarding {} buffered bytes", self.buffer.len());
            self.buffer.clear();
            if let Err(e) = self.transport.discard_input() {
                warn!("Failed to discard transport input: {}", e);
            }
        }
        while let Ok(command) = self.commands.try_recv() {
            match self.transport.write_all(&command) {
                Ok(()) => debug!("Sent {} command bytes", command.len()),
                Err(e) => warn!("Failed to send command: {}", e),
            }
        }
    }

    fn drain_buffer(&mut self) {
        loop {
            let outcome = self.parser.process(&self.buffer);
            if outcome.consumed == 0 {
                break;
            }
            self.buffer.drain(..outcome.consumed);
            for frame in outcome.frames {
                self.handle_frame(frame);
            }
        }
        self.enforce_pending_limit();
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Packet(packet) => {
                let outcome = packet.outcome();
                self.monitor.record(outcome);
                if outcome.is_pass() {
                    let raw = packet.as_bytes().to_vec();
                    self.events.emit(ReaderEvent::TimedDataPacketReceived {
                        raw: raw.clone(),
                        timestamp: capture_timestamp(),
                    });
                    self.events.emit(ReaderEvent::DataPacketReceived(raw));
                } else {
                    debug!("Checksum error in received packet");
                }
                self.events
                    .emit(ReaderEvent::FailureRateUpdated(self.monitor.failure_rate()));
            }
            Frame::Info(report) => {
                self.events.emit(ReaderEvent::InfoReportReceived(report.into_bytes()));
            }
        }
    }

    /// After a parse pass the buffer holds either a partial packet, which is shorter than any
    /// allowed limit, or text still waiting for its line feed. Text past the limit is dropped,
    /// keeping a trailing partial magic header so the next packet is still found.
    fn enforce_pending_limit(&mut self) {
        let pending = self.buffer.len();
        if pending <= self.max_pending {
            return;
        }
        let keep = magic_prefix_suffix_len(&self.buffer);
        self.buffer.drain(..pending - keep);
        let err = ReaderError::PendingOverflow {
            pending,
            limit: self.max_pending,
        };
        warn!("{}; discarded {} bytes", err, pending - keep);
        self.events.emit_lifecycle(ReaderEvent::ErrorOccurred(err.to_string()));
    }

    fn shutdown(&mut self) {
        if self.control.state() != EngineState::Errored {
            self.control.set_state(EngineState::Stopping);
        }
        self.transport.close();
        self.events
            .emit_lifecycle(ReaderEvent::ConnectionStatusChanged(false));
        self.control.set_state(EngineState::Stopped);
        info!("Reader thread finished.");
    }
}

fn capture_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
