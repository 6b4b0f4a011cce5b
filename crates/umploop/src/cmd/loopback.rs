use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use umploop_packet::builder::{midi1_channel_voice, sysex7_packets, system_message};
use umploop_packet::Packet;
use umploop_stream::{
    negotiate, Consumer, DeviceConfig, DeviceService, LocalDevice, LoopedStream, MemorySink,
    StreamConfig, StreamError, WaitStatus,
};

use crate::cmd::{parse_duration, LoopbackArgs};
use crate::exit::{io_error, stream_error, CliError, CliResult, DATA_INVALID, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

/// How long the consumer waits for data before declaring the producer stalled.
const CONSUMER_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Contents of a `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoopbackConfig {
    stream: StreamConfig,
    device: DeviceConfig,
}

#[derive(Debug, Serialize)]
struct LoopbackOutput {
    mode: &'static str,
    capacity: usize,
    sent: usize,
    received: usize,
    in_order: bool,
    full_retries: u64,
    validation_errors: usize,
    elapsed_ms: f64,
}

#[derive(Debug, Default)]
struct ConsumerStats {
    received: usize,
    in_order: bool,
}

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => LoopbackConfig::default(),
    };
    if let Some(size) = args.buffer_size {
        config.stream.buffer_size = size;
    }
    if let Some(timeout) = &args.timeout {
        config.stream.negotiation_timeout = parse_duration(timeout)?;
    }
    if args.no_guard {
        config.stream.enforce_sysex_interleave = false;
    }

    let sink = Arc::new(MemorySink::new());
    let stream = open_stream(&config, args.service)?.with_diagnostics(sink.clone());
    let capacity = stream.capacity();
    let (mut producer, consumer) = stream.split();

    let packets = demo_packets(args.count, args.sysex);
    info!(capacity, packets = packets.len(), "starting loopback");

    let reader = thread::Builder::new()
        .name("umploop-consumer".to_string())
        .spawn(move || drain(consumer))
        .map_err(|err| io_error("cannot start consumer thread", err))?;

    let start = Instant::now();
    let mut full_retries = 0u64;
    for packet in &packets {
        loop {
            match producer.enqueue_packet(packet) {
                Ok(()) => break,
                Err(StreamError::BufferFull { .. }) => {
                    full_retries += 1;
                    thread::yield_now();
                }
                Err(err) => return Err(stream_error("enqueue failed", err)),
            }
        }
    }
    producer.close();

    let stats = reader
        .join()
        .map_err(|_| CliError::new(INTERNAL, "consumer thread panicked"))?
        .map_err(|err| stream_error("consumer failed", err))?;
    let elapsed = start.elapsed();
    debug!(?elapsed, full_retries, "loopback finished");

    let out = LoopbackOutput {
        mode: if args.service { "service" } else { "local" },
        capacity,
        sent: packets.len(),
        received: stats.received,
        in_order: stats.in_order,
        full_retries,
        validation_errors: sink.len(),
        elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
    };
    print_output(&out, format);

    if out.received != out.sent || !out.in_order || out.validation_errors > 0 {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

fn load_config(path: &Path) -> CliResult<LoopbackConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("cannot read {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

fn open_stream(config: &LoopbackConfig, use_service: bool) -> CliResult<LoopedStream> {
    let device = LocalDevice::new(config.device);
    let stream = if use_service {
        let service = DeviceService::spawn(device)
            .map_err(|err| stream_error("cannot start device service", err))?;
        let mut client = service.client();
        negotiate(&mut client, &config.stream)
    } else {
        let mut device = device;
        negotiate(&mut device, &config.stream)
    };
    stream.map_err(|err| stream_error("negotiation failed", err))
}

fn drain(mut consumer: Consumer) -> Result<ConsumerStats, StreamError> {
    let mut stats = ConsumerStats {
        received: 0,
        in_order: true,
    };
    let mut last = None;
    loop {
        match consumer.wait(Some(CONSUMER_IDLE_TIMEOUT))? {
            WaitStatus::Readable => {
                while let Some(event) = consumer.dequeue() {
                    if last.is_some_and(|prev| event.position <= prev) {
                        stats.in_order = false;
                    }
                    last = Some(event.position);
                    stats.received += 1;
                }
            }
            WaitStatus::Closed => return Ok(stats),
            WaitStatus::TimedOut => {
                debug!(received = stats.received, "producer stalled, consumer giving up");
                return Ok(stats);
            }
        }
    }
}

/// A repeating mix of note on/off, timing clock and, optionally, one SysEx7
/// message spread across the run.
fn demo_packets(count: usize, sysex_bytes: Option<usize>) -> Vec<Packet> {
    let mut packets: Vec<Packet> = (0..count)
        .map(|i| {
            let group = (i % 4) as u8;
            let note = (36 + i % 48) as u8;
            match i % 3 {
                0 => midi1_channel_voice(group, 0x90, note, 100),
                1 => midi1_channel_voice(group, 0x80, note, 0),
                _ => system_message(group, 0xF8, 0, 0),
            }
        })
        .collect();

    if let Some(len) = sysex_bytes {
        // Group 15 never carries the voice traffic above.
        let payload: Vec<u8> = (0..len).map(|i| (i % 0x80) as u8).collect();
        let at = packets.len() / 2;
        packets.splice(at..at, sysex7_packets(15, &payload));
    }
    packets
}

fn print_output(out: &LoopbackOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut t = table(["MODE", "CAPACITY", "SENT", "RECEIVED", "RETRIES", "ERRORS", "MS"]);
            t.add_row(vec![
                out.mode.to_string(),
                out.capacity.to_string(),
                out.sent.to_string(),
                out.received.to_string(),
                out.full_retries.to_string(),
                out.validation_errors.to_string(),
                format!("{:.2}", out.elapsed_ms),
            ]);
            println!("{t}");
        }
        OutputFormat::Pretty => {
            println!("Loopback ({}):", out.mode);
            println!("  Capacity:          {} bytes", out.capacity);
            println!("  Sent / received:   {} / {}", out.sent, out.received);
            println!("  In order:          {}", out.in_order);
            println!("  Buffer-full retries: {}", out.full_retries);
            println!("  Validation errors: {}", out.validation_errors);
            println!("  Elapsed:           {:.2}ms", out.elapsed_ms);
        }
        OutputFormat::Raw => println!("{}", out.received),
    }
}

#[cfg(test)]
mod tests {
    use umploop_packet::sysex::sysex7_status;
    use umploop_packet::SysExStatus;

    use super::*;

    #[test]
    fn demo_packets_cycle_through_groups() {
        let packets = demo_packets(6, None);
        assert_eq!(packets.len(), 6);
        assert_eq!(packets[0].group(), Some(0));
        assert_eq!(packets[5].group(), Some(1));
        assert_eq!(packets[2].words(), &[0x12F8_0000]);
    }

    #[test]
    fn sysex_is_inserted_in_the_middle() {
        let packets = demo_packets(10, Some(13));
        assert_eq!(packets.len(), 13);
        assert_eq!(sysex7_status(packets[5].word0()), Some(SysExStatus::Start));
        assert_eq!(sysex7_status(packets[7].word0()), Some(SysExStatus::End));
        assert_eq!(packets[5].group(), Some(15));
    }

    #[test]
    fn config_file_sections_are_optional() {
        let config: LoopbackConfig =
            serde_json::from_str(r#"{"stream": {"buffer_size": 512}}"#).unwrap();
        assert_eq!(config.stream.buffer_size, 512);
        assert_eq!(config.device, DeviceConfig::default());
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        assert!(serde_json::from_str::<LoopbackConfig>(r#"{"streams": {}}"#).is_err());
    }

    #[test]
    fn local_loopback_delivers_everything() {
        let config = LoopbackConfig {
            stream: StreamConfig {
                buffer_size: 64,
                ..StreamConfig::default()
            },
            ..LoopbackConfig::default()
        };
        let (mut producer, consumer) = open_stream(&config, false).unwrap().split();
        let reader = thread::spawn(move || drain(consumer).unwrap());

        for packet in demo_packets(300, Some(20)) {
            while let Err(StreamError::BufferFull { .. }) = producer.enqueue_packet(&packet) {
                thread::yield_now();
            }
        }
        producer.close();

        let stats = reader.join().unwrap();
        assert_eq!(stats.received, 304);
        assert!(stats.in_order);
    }
}
