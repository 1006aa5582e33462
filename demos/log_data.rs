use chrono::Local;
use csv::Writer;
use libtelem::{DataPacket, ReaderConfig, ReaderEvent, ReaderSupervisor, SerialSettings, SocketSettings, NUM_CHANNELS};
use std::{
    env,
    fs::File,
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

fn write_csv_record(wtr: &mut Writer<File>, packet: &DataPacket, timestamp: f64, count: u64) -> Result<(), csv::Error> {
    let mut record = vec![count.to_string(), format!("{:.6}", timestamp)];
    let volts = packet.voltages();
    for (raw, volt) in packet.channels().iter().zip(volts.iter()) {
        record.push(raw.to_string());
        record.push(format!("{:.4}", volt));
    }
    wtr.write_record(&record)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1).map(String::as_str) {
        Some("serial") => ReaderConfig::serial(SerialSettings {
            port: args.get(2).cloned().unwrap_or_else(|| "/dev/ttyUSB0".to_string()),
            ..Default::default()
        }),
        _ => ReaderConfig::socket(SocketSettings::default()),
    };
    let mut reader = ReaderSupervisor::new(config)?;
    reader.start()?;

    // --- CSV Setup ---
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let csv_filename = format!("telemetry_{}.csv", timestamp);
    let mut wtr = Writer::from_path(&csv_filename)?;
    println!("Writing data to {}", csv_filename);

    let mut header = vec!["packet_counter".to_string(), "timestamp_s".to_string()];
    for i in 1..=NUM_CHANNELS {
        header.push(format!("ch{}_raw", i));
        header.push(format!("ch{}_volts", i));
    }
    wtr.write_record(&header)?;

    // --- Graceful Shutdown Setup ---
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    println!("Press Ctrl+C to stop recording.");

    // --- Status & Loop Setup ---
    let mut packet_count = 0u64;
    let mut failure_rate = 0.0;
    let mut last_status_time = Instant::now();
    let mut packets_since_update = 0u64;
    let status_interval = Duration::from_millis(500);

    while running.load(Ordering::SeqCst) {
        match reader.recv_event_timeout(Duration::from_millis(10))? {
            Some(ReaderEvent::TimedDataPacketReceived { raw, timestamp }) => {
                if let Some(packet) = DataPacket::from_bytes(&raw) {
                    packet_count += 1;
                    packets_since_update += 1;
                    write_csv_record(&mut wtr, &packet, timestamp, packet_count)?;
                }
            }
            Some(ReaderEvent::FailureRateUpdated(rate)) => failure_rate = rate,
            Some(ReaderEvent::ErrorOccurred(msg)) => eprintln!("\nReader error: {}", msg),
            Some(ReaderEvent::ConnectionStatusChanged(false)) => break,
            _ => {}
        }

        // --- Status Update ---
        let now = Instant::now();
        if now.duration_since(last_status_time) >= status_interval {
            let elapsed_secs = now.duration_since(last_status_time).as_secs_f64();
            let rate = packets_since_update as f64 / elapsed_secs;
            let dropped = reader.dropped_count();
            let file_size_mb = wtr.get_ref().metadata()?.len() as f64 / (1024.0 * 1024.0);

            print!(
                "\rStatus | Rate: {:>7.2} Hz | Packets: {:>8} | Bad: {:>5.1}% | Dropped: {:>5} | File Size: {:>8.2} MB",
                rate, packet_count, failure_rate, dropped, file_size_mb
            );
            io::stdout().flush()?;

            last_status_time = now;
            packets_since_update = 0;
        }
    }

    // --- Finalization ---
    wtr.flush()?;
    let final_dropped = reader.dropped_count();
    let final_file_size = File::open(&csv_filename)?.metadata()?.len();

    println!("\n\nFinished recording.");
    println!("Wrote {} packets to {}", packet_count, csv_filename);
    println!("Final file size: {:.2} MB", final_file_size as f64 / (1024.0 * 1024.0));
    println!("Total events dropped: {}", final_dropped);

    reader.stop()?;
    Ok(())
}
