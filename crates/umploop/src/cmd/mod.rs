use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use umploop_packet::{word_count, Packet};

use crate::exit::{packet_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod guard;
pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split hex words into packets and show their fields.
    Decode(DecodeArgs),
    /// Run packets through the SysEx7 interleave guard.
    Guard(GuardArgs),
    /// Stream packets through a local looped ring and report statistics.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Guard(args) => guard::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Packet words in hex (e.g. 40903C40 0x7F000000).
    #[arg(required = true, num_args = 1..)]
    pub words: Vec<String>,
}

#[derive(Args, Debug)]
pub struct GuardArgs {
    /// Packet words in hex, in sending order.
    #[arg(required = true, num_args = 1..)]
    pub words: Vec<String>,
    /// Exit with a data error when any SysEx7 stream is terminated.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Number of packets to send.
    #[arg(long, short = 'n', default_value = "1000")]
    pub count: usize,
    /// Minimum ring buffer size in bytes (overrides the config file).
    #[arg(long)]
    pub buffer_size: Option<u32>,
    /// Negotiation timeout (e.g. 5s, 500ms; overrides the config file).
    #[arg(long)]
    pub timeout: Option<String>,
    /// JSON file with `stream` and `device` settings.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Run the device on a service thread instead of in-line.
    #[arg(long)]
    pub service: bool,
    /// Interleave a SysEx7 message with this many payload bytes.
    #[arg(long, value_name = "BYTES")]
    pub sysex: Option<usize>,
    /// Do not enforce SysEx7 interleaving rules on the producer.
    #[arg(long)]
    pub no_guard: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse one hex word; `0x` prefixes and `_` separators are accepted.
pub fn parse_word(input: &str) -> CliResult<u32> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");
    if digits.is_empty() || digits.len() > 8 {
        return Err(CliError::usage(format!("invalid word: {input}")));
    }
    u32::from_str_radix(&digits, 16).map_err(|_| CliError::usage(format!("invalid word: {input}")))
}

pub fn parse_words(inputs: &[String]) -> CliResult<Vec<u32>> {
    inputs
        .iter()
        .flat_map(|input| input.split([',', ' ']))
        .filter(|part| !part.is_empty())
        .map(parse_word)
        .collect()
}

/// Split a word sequence into packets using each first word's type.
pub fn split_packets(words: &[u32]) -> CliResult<Vec<Packet>> {
    let mut packets = Vec::new();
    let mut rest = words;
    while let Some(&word0) = rest.first() {
        let len = word_count(word0);
        if rest.len() < len {
            return Err(CliError::new(
                crate::exit::DATA_INVALID,
                format!(
                    "truncated packet at word {}: {word0:08X} needs {len} words, {} left",
                    words.len() - rest.len(),
                    rest.len()
                ),
            ));
        }
        let packet =
            Packet::from_words(&rest[..len]).map_err(|err| packet_error("invalid packet", err))?;
        packets.push(packet);
        rest = &rest[len..];
    }
    Ok(packets)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::{DATA_INVALID, USAGE};

    #[test]
    fn words_accept_common_spellings() {
        assert_eq!(parse_word("40903c40").unwrap(), 0x4090_3C40);
        assert_eq!(parse_word("0x7F000000").unwrap(), 0x7F00_0000);
        assert_eq!(parse_word("2090_3C40").unwrap(), 0x2090_3C40);
        assert_eq!(parse_word("f").unwrap(), 0xF);
    }

    #[test]
    fn bad_words_are_usage_errors() {
        for input in ["", "0x", "zz", "123456789"] {
            assert_eq!(parse_word(input).unwrap_err().code, USAGE, "{input:?}");
        }
    }

    #[test]
    fn word_lists_may_be_comma_separated() {
        let words = parse_words(&["40903C40,7F000000".to_string(), "20903C40".to_string()]).unwrap();
        assert_eq!(words, vec![0x4090_3C40, 0x7F00_0000, 0x2090_3C40]);
    }

    #[test]
    fn splits_by_message_type() {
        let packets = split_packets(&[0x4090_3C40, 0x7F00_0000, 0x2090_3C40, 0x0000_0000]).unwrap();
        let lens: Vec<usize> = packets.iter().map(Packet::len).collect();
        assert_eq!(lens, vec![2, 1, 1]);
    }

    #[test]
    fn truncated_tail_is_data_invalid() {
        let err = split_packets(&[0x2090_3C40, 0x4090_3C40]).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("word 1"));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert!(parse_duration("0ms").is_err());
        assert!(parse_duration("soon").is_err());
    }
}
