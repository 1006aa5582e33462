//! End-to-end tests over a loopback TCP connection

mod common;

use common::{count_status, packet, NUM_CHANNELS};
use libtelem::{EngineState, ReaderConfig, ReaderEvent, ReaderSupervisor, SocketSettings};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn free_port() -> u16 {
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

fn socket_config(port: u16) -> ReaderConfig {
    ReaderConfig::socket(SocketSettings {
        host: "127.0.0.1".to_string(),
        port,
        read_timeout: Duration::from_millis(20),
    })
}

fn connect(port: u16) -> TcpStream {
    let deadline = Instant::now() + WAIT;
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            Err(e) => panic!("could not connect to reader: {}", e),
        }
    }
}

fn collect_until_disconnect(reader: &ReaderSupervisor) -> Vec<ReaderEvent> {
    let deadline = Instant::now() + WAIT;
    let mut events = Vec::new();
    while count_status(&events, false) == 0 && Instant::now() < deadline {
        if let Ok(Some(event)) = reader.recv_event_timeout(Duration::from_millis(50)) {
            events.push(event);
        }
    }
    events
}

#[test]
fn test_fragmented_stream_over_socket() {
    let port = free_port();
    let mut reader = ReaderSupervisor::new(socket_config(port)).unwrap();
    reader.start().unwrap();

    let mut stream = Vec::new();
    stream.extend(b"device ready\n");
    stream.extend(packet([10, 20, 30, 40, 50, 60, 70, 80]));
    stream.extend(packet([-1; NUM_CHANNELS]));

    let mut client = connect(port);
    for piece in stream.chunks(5) {
        client.write_all(piece).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    drop(client);

    let events = collect_until_disconnect(&reader);
    reader.stop().unwrap();

    assert_eq!(events.first(), Some(&ReaderEvent::ConnectionStatusChanged(true)));
    assert_eq!(events[1], ReaderEvent::InfoReportReceived(b"device ready\n".to_vec()));
    let channels: Vec<[i32; NUM_CHANNELS]> = events
        .iter()
        .filter_map(|e| match e {
            ReaderEvent::DataPacketReceived(raw) => libtelem::DataPacket::from_bytes(raw).map(|p| p.channels()),
            _ => None,
        })
        .collect();
    assert_eq!(channels, vec![[10, 20, 30, 40, 50, 60, 70, 80], [-1; NUM_CHANNELS]]);
    assert!(events.contains(&ReaderEvent::ErrorOccurred("Peer disconnected".to_string())));
    assert_eq!(count_status(&events, false), 1);
    assert_eq!(reader.state(), EngineState::Stopped);
}

#[test]
fn test_stop_while_waiting_for_client() {
    let mut reader = ReaderSupervisor::new(socket_config(free_port())).unwrap();
    reader.start().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(reader.state(), EngineState::Connecting);

    let started = Instant::now();
    reader.stop().unwrap();
    assert!(started.elapsed() < WAIT);
    assert_eq!(reader.state(), EngineState::Stopped);

    let mut events = Vec::new();
    while let Ok(Some(event)) = reader.try_recv_event() {
        events.push(event);
    }
    assert_eq!(events, vec![ReaderEvent::ConnectionStatusChanged(false)]);
}

#[test]
fn test_stop_while_client_connected() {
    let port = free_port();
    let mut reader = ReaderSupervisor::new(socket_config(port)).unwrap();
    reader.start().unwrap();
    let _client = connect(port);

    let deadline = Instant::now() + WAIT;
    while reader.state() != EngineState::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(reader.state(), EngineState::Running);

    reader.stop().unwrap();
    let mut events = Vec::new();
    while let Ok(Some(event)) = reader.try_recv_event() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            ReaderEvent::ConnectionStatusChanged(true),
            ReaderEvent::ConnectionStatusChanged(false),
        ]
    );
}

#[test]
fn test_command_reaches_socket_client() {
    let port = free_port();
    let mut reader = ReaderSupervisor::new(socket_config(port)).unwrap();
    reader.start().unwrap();
    let client = connect(port);
    client.set_read_timeout(Some(WAIT)).unwrap();

    let deadline = Instant::now() + WAIT;
    while reader.state() != EngineState::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    reader.send_command(b"RESET\n".to_vec()).unwrap();

    let mut received = [0u8; 6];
    std::io::Read::read_exact(&mut &client, &mut received).unwrap();
    assert_eq!(&received, b"RESET\n");
    reader.stop().unwrap();
}
