use super::{CloseHandle, ReadOutcome, Transport, TransportState};
use crate::config::SerialSettings;
use crate::error::ReaderError;
use log::{debug, info};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Serial port link.
///
/// Reads use a short timeout, so closing through the [`CloseHandle`] takes effect within one
/// poll interval.
pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
    closed: Arc<AtomicBool>,
    state: TransportState,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings) -> Self {
        SerialTransport {
            settings,
            port: None,
            closed: Arc::new(AtomicBool::new(false)),
            state: TransportState::Unconnected,
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn release(&mut self) {
        if self.port.take().is_some() {
            info!("Serial port {} closed.", self.settings.port);
        }
        self.state = TransportState::Closed;
    }
}

impl Transport for SerialTransport {
    fn setup(&mut self) -> Result<(), ReaderError> {
        if self.state == TransportState::Closed || self.closed.load(Ordering::SeqCst) {
            return Err(ReaderError::ConnectionSetup(format!(
                "serial port {} was already closed",
                self.settings.port
            )));
        }
        let s = &self.settings;
        info!(
            "Opening serial port: {} at {} baud ({:?}, {:?} parity, {:?} stop bits)",
            s.port, s.baud_rate, s.data_bits, s.parity, s.stop_bits
        );
        let port = serialport::new(s.port.as_str(), s.baud_rate)
            .stop_bits(s.stop_bits.into())
            .parity(s.parity.into())
            .data_bits(s.data_bits.into())
            .timeout(s.read_timeout)
            .open()
            .map_err(|e| {
                ReaderError::ConnectionSetup(format!("Failed to open port {}: {}", s.port, e))
            })?;
        info!("Serial port opened successfully.");
        self.port = Some(port);
        self.state = TransportState::Connected;
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ReaderError> {
        if self.closed.load(Ordering::SeqCst) {
            self.release();
            return Ok(ReadOutcome::Ended);
        }
        let Some(port) = self.port.as_mut() else {
            return Err(ReaderError::TransportRead("serial port is not open".to_string()));
        };
        match port.read(buf) {
            Ok(0) => Ok(ReadOutcome::Idle),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => Err(ReaderError::TransportRead(format!("Serial read error: {}", e))),
        }
    }

    fn discard_input(&mut self) -> Result<(), ReaderError> {
        if let Some(port) = self.port.as_ref() {
            port.clear(ClearBuffer::Input)?;
            debug!("Cleared serial input buffer");
        }
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ReaderError> {
        let port = self.port.as_mut().ok_or_else(|| {
            ReaderError::Io(io::Error::new(io::ErrorKind::NotConnected, "serial port is not open"))
        })?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.release();
    }

    fn close_handle(&self) -> CloseHandle {
        CloseHandle::new(Arc::clone(&self.closed))
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn describe(&self) -> String {
        format!("serial {} @ {}", self.settings.port, self.settings.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_device() -> SerialSettings {
        SerialSettings {
            port: "/dev/libtelem-no-such-device".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_device_fails_setup() {
        let mut transport = SerialTransport::new(missing_device());
        match transport.setup() {
            Err(ReaderError::ConnectionSetup(msg)) => assert!(msg.contains("no-such-device")),
            other => panic!("expected setup error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(transport.state(), TransportState::Unconnected);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let mut transport = SerialTransport::new(missing_device());
        transport.close();
        transport.close();
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.close_handle().is_closed());
        assert!(matches!(transport.setup(), Err(ReaderError::ConnectionSetup(_))));
    }

    #[test]
    fn remote_close_ends_reads() {
        let mut transport = SerialTransport::new(missing_device());
        transport.close_handle().close();
        let mut buf = [0u8; 16];
        assert_eq!(transport.read_available(&mut buf).unwrap(), ReadOutcome::Ended);
        assert_eq!(transport.state(), TransportState::Closed);
    }
}
