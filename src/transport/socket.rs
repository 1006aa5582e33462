use super::{CloseHandle, ReadOutcome, Transport, TransportState};
use crate::config::SocketSettings;
use crate::error::ReaderError;
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_CHUNK: usize = 1024;

/// TCP listener that serves exactly one client.
///
/// `setup` blocks until the client connects or the transport is closed. A clone of the client
/// stream is kept so that another thread can shut it down and wake a pending read.
pub struct SocketTransport {
    settings: SocketSettings,
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    peer: Arc<Mutex<Option<TcpStream>>>,
    closed: Arc<AtomicBool>,
    state: TransportState,
}

impl SocketTransport {
    pub fn new(settings: SocketSettings) -> Self {
        SocketTransport {
            settings,
            listener: None,
            client: None,
            peer: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            state: TransportState::Unconnected,
        }
    }

    pub fn settings(&self) -> &SocketSettings {
        &self.settings
    }

    fn resolve(&self) -> Result<SocketAddr, ReaderError> {
        let host = self.settings.host.as_str();
        let port = self.settings.port;
        (host, port)
            .to_socket_addrs()
            .map_err(|e| ReaderError::ConnectionSetup(format!("Failed to resolve {}:{} - {}", host, port, e)))?
            .next()
            .ok_or_else(|| ReaderError::ConnectionSetup(format!("No address for {}:{}", host, port)))
    }

    fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    fn accept_one(&self, listener: &TcpListener) -> Result<(TcpStream, SocketAddr), ReaderError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ReaderError::ConnectionSetup(
                    "socket closed while waiting for a client".to_string(),
                ));
            }
            match listener.accept() {
                Ok(accepted) => return Ok(accepted),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReaderError::ConnectionSetup(format!("Accept failed: {}", e))),
            }
        }
    }

    fn configure_client(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.settings.read_timeout))?;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.shutdown(Shutdown::Both);
            info!("Socket client closed.");
        }
        if let Ok(mut peer) = self.peer.lock() {
            peer.take();
        }
        if self.listener.take().is_some() {
            debug!("Listener on {}:{} closed", self.settings.host, self.settings.port);
        }
        self.state = TransportState::Closed;
    }
}

impl Transport for SocketTransport {
    fn setup(&mut self) -> Result<(), ReaderError> {
        if self.state == TransportState::Closed || self.closed.load(Ordering::SeqCst) {
            return Err(ReaderError::ConnectionSetup("socket transport was already closed".to_string()));
        }
        let addr = self.resolve()?;
        let listener = Self::bind(addr)
            .map_err(|e| ReaderError::ConnectionSetup(format!("Failed to bind {} - {}", addr, e)))?;
        info!("Listening on {}", addr);

        let (stream, peer_addr) = self.accept_one(&listener)?;
        self.configure_client(&stream)
            .map_err(|e| ReaderError::ConnectionSetup(format!("Failed to configure client {}: {}", peer_addr, e)))?;
        let remote = stream
            .try_clone()
            .map_err(|e| ReaderError::ConnectionSetup(format!("Failed to clone client stream: {}", e)))?;
        if let Ok(mut peer) = self.peer.lock() {
            *peer = Some(remote);
        }
        info!("Client connected from {}", peer_addr);

        self.listener = Some(listener);
        self.client = Some(stream);
        self.state = TransportState::Connected;

        // A close that raced with the accept would have missed the peer slot.
        if self.closed.load(Ordering::SeqCst) {
            self.release();
            return Err(ReaderError::ConnectionSetup(
                "socket closed while waiting for a client".to_string(),
            ));
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ReaderError> {
        if self.closed.load(Ordering::SeqCst) {
            self.release();
            return Ok(ReadOutcome::Ended);
        }
        let Some(client) = self.client.as_mut() else {
            return Err(ReaderError::TransportRead("socket has no connected client".to_string()));
        };
        match client.read(buf) {
            Ok(0) => {
                info!("Client disconnected");
                Ok(ReadOutcome::Ended)
            }
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => Err(ReaderError::TransportRead(format!("Socket read error: {}", e))),
        }
    }

    fn discard_input(&mut self) -> Result<(), ReaderError> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        client.set_nonblocking(true)?;
        let mut scratch = [0u8; DRAIN_CHUNK];
        let mut dropped = 0usize;
        let result = loop {
            match client.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        client.set_nonblocking(false)?;
        if dropped > 0 {
            debug!("Discarded {} pending socket bytes", dropped);
        }
        result.map_err(ReaderError::from)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ReaderError> {
        let client = self.client.as_mut().ok_or_else(|| {
            ReaderError::Io(io::Error::new(io::ErrorKind::NotConnected, "socket has no connected client"))
        })?;
        client.write_all(data)?;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.release();
    }

    fn close_handle(&self) -> CloseHandle {
        let peer = Arc::clone(&self.peer);
        CloseHandle::new(Arc::clone(&self.closed)).with_hook(move || match peer.lock() {
            Ok(guard) => {
                if let Some(stream) = guard.as_ref() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
            }
            Err(_) => warn!("Peer stream lock poisoned; relying on read timeout to close"),
        })
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn describe(&self) -> String {
        format!("socket {}:{}", self.settings.host, self.settings.port)
    }
}
