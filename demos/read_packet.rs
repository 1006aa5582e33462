use libtelem::{
    DataPacket, InfoReport, ReaderConfig, ReaderError, ReaderEvent, ReaderSupervisor, SerialSettings, SocketSettings,
};
use std::{env, time::Duration};

fn usage(program: &str) {
    eprintln!("Usage: {} serial <port> [baud_rate] | socket [host] [port]", program);
    eprintln!("Example: {} serial /dev/ttyUSB0 115200", program);
    eprintln!("Example: {} socket 0.0.0.0 8234", program);
}

fn config_from_args(args: &[String]) -> Option<ReaderConfig> {
    match args.get(1).map(String::as_str) {
        Some("serial") => {
            let port = args.get(2)?.clone();
            let baud_rate = args.get(3).and_then(|b| b.parse::<u32>().ok()).unwrap_or(115200);
            Some(ReaderConfig::serial(SerialSettings {
                port,
                baud_rate,
                ..Default::default()
            }))
        }
        Some("socket") => {
            let mut settings = SocketSettings::default();
            if let Some(host) = args.get(2) {
                settings.host = host.clone();
            }
            if let Some(port) = args.get(3).and_then(|p| p.parse::<u16>().ok()) {
                settings.port = port;
            }
            Some(ReaderConfig::socket(settings))
        }
        _ => None,
    }
}

fn main() -> Result<(), ReaderError> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .map_err(|e| ReaderError::InvalidConfig(format!("logger: {}", e)))?;

    let args: Vec<String> = env::args().collect();
    let Some(config) = config_from_args(&args) else {
        usage(&args[0]);
        return Ok(());
    };

    let mut reader = ReaderSupervisor::new(config)?;
    reader.start()?;

    println!("Press Ctrl+C to stop.");
    let start_time = std::time::Instant::now();
    loop {
        match reader.recv_event_timeout(Duration::from_millis(100)) {
            Ok(Some(ReaderEvent::DataPacketReceived(raw))) => {
                if let Some(packet) = DataPacket::from_bytes(&raw) {
                    let volts = packet.voltages();
                    println!(
                        "Received Packet: CH1={} ({:.3} V), CH8={} ({:.3} V)",
                        packet.channels()[0],
                        volts[0],
                        packet.channels()[7],
                        volts[7]
                    );
                }
            }
            Ok(Some(ReaderEvent::InfoReportReceived(raw))) => {
                println!("Info: {}", InfoReport::new(raw).text());
            }
            Ok(Some(ReaderEvent::FailureRateUpdated(rate))) if rate > 0.0 => {
                println!("Checksum failure rate: {:.1}%", rate);
            }
            Ok(Some(ReaderEvent::ErrorOccurred(msg))) => {
                eprintln!("Reader error: {}", msg);
            }
            Ok(Some(ReaderEvent::ConnectionStatusChanged(connected))) => {
                println!("Connected: {}", connected);
                if !connected {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Unexpected error receiving event: {:?}", e);
                break;
            }
        }

        if start_time.elapsed() > Duration::from_secs(3000) {
            println!("Timeout reached. Stopping reader.");
            break;
        }
    }

    reader.stop()?;
    println!("Program finished.");
    Ok(())
}
