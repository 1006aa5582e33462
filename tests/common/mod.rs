//! Common test utilities and shared imports

#![allow(dead_code)]

use libtelem::{CloseHandle, ReadOutcome, ReaderError, Transport, TransportState};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

pub use libtelem::{DataPacket, EngineOptions, EngineState, ReaderEngine, ReaderEvent, NUM_CHANNELS, PACKET_LEN};

/// One scripted response of [`ScriptedTransport::read_available`].
#[derive(Debug, Clone)]
pub enum Step {
    Data(Vec<u8>),
    Idle,
    End,
    Fail(String),
}

/// Observations shared between a test and the transport it handed to the engine.
#[derive(Debug, Default, Clone)]
pub struct Probe {
    pub closed: Arc<AtomicBool>,
    pub close_calls: Arc<AtomicUsize>,
    pub discards: Arc<AtomicUsize>,
    pub reads: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Vec<u8>>>,
}

/// In-memory transport that replays a fixed script, then idles.
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    setup_error: Option<String>,
    probe: Probe,
    state: TransportState,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> (Self, Probe) {
        let probe = Probe::default();
        let transport = ScriptedTransport {
            steps: steps.into(),
            setup_error: None,
            probe: probe.clone(),
            state: TransportState::Unconnected,
        };
        (transport, probe)
    }

    pub fn failing_setup(message: &str) -> (Self, Probe) {
        let (mut transport, probe) = Self::new(Vec::new());
        transport.setup_error = Some(message.to_string());
        (transport, probe)
    }
}

impl Transport for ScriptedTransport {
    fn setup(&mut self) -> Result<(), ReaderError> {
        if let Some(msg) = &self.setup_error {
            return Err(ReaderError::ConnectionSetup(msg.clone()));
        }
        self.state = TransportState::Connected;
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ReaderError> {
        if self.probe.closed.load(Ordering::SeqCst) {
            return Ok(ReadOutcome::Ended);
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(ReadOutcome::Data(n))
            }
            Some(Step::Idle) | None => {
                std::thread::sleep(Duration::from_millis(2));
                Ok(ReadOutcome::Idle)
            }
            Some(Step::End) => Ok(ReadOutcome::Ended),
            Some(Step::Fail(msg)) => Err(ReaderError::TransportRead(msg)),
        }
    }

    fn discard_input(&mut self) -> Result<(), ReaderError> {
        self.probe.discards.fetch_add(1, Ordering::SeqCst);
        self.steps.clear();
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ReaderError> {
        self.probe.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state = TransportState::Closed;
    }

    fn close_handle(&self) -> CloseHandle {
        CloseHandle::new(Arc::clone(&self.probe.closed))
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub fn packet(channels: [i32; NUM_CHANNELS]) -> Vec<u8> {
    DataPacket::encode(&channels).as_bytes().to_vec()
}

pub fn corrupted_packet(channels: [i32; NUM_CHANNELS]) -> Vec<u8> {
    let mut raw = packet(channels);
    raw[PACKET_LEN - 1] ^= 0xFF;
    raw
}

/// Collects events until `done` returns true for the collected list or `timeout` passes.
pub fn collect_until<F>(engine: &ReaderEngine, timeout: Duration, mut done: F) -> Vec<ReaderEvent>
where
    F: FnMut(&[ReaderEvent]) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while !done(&events) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if let Ok(Some(event)) = engine.recv_event_timeout(remaining) {
            events.push(event);
        }
    }
    events
}

pub fn drain(engine: &ReaderEngine) -> Vec<ReaderEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = engine.try_recv_event() {
        events.push(event);
    }
    events
}

pub fn count_status(events: &[ReaderEvent], connected: bool) -> usize {
    events
        .iter()
        .filter(|e| **e == ReaderEvent::ConnectionStatusChanged(connected))
        .count()
}
