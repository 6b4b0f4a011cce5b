use serde::Serialize;
use umploop_packet::fields::{
    channel_voice_status, data128_status, data64_byte_count, data64_status, flex_data_status,
    system_common_status, ump32_status,
};
use umploop_packet::stream::{STATUS_ENDPOINT_INFO, STATUS_FUNCTION_BLOCK_INFO};
use umploop_packet::sysex::sysex7_status;
use umploop_packet::{
    stream_form, stream_status, EndpointInfo, FunctionBlockInfo, MessageType, Packet, SysExStatus,
};

use crate::cmd::{parse_words, split_packets, DecodeArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{hex_words, optional, print_json, table, OutputFormat};

#[derive(Debug, Serialize)]
struct PacketOutput {
    index: usize,
    message_type: MessageType,
    words: Vec<String>,
    group: Option<u8>,
    channel: Option<u8>,
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sysex7: Option<SysExStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sysex7_bytes: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_form: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint_info: Option<EndpointInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_block_info: Option<FunctionBlockInfo>,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let words = parse_words(&args.words)?;
    let packets = split_packets(&words)?;
    let out: Vec<PacketOutput> = packets
        .iter()
        .enumerate()
        .map(|(index, packet)| describe(index, packet))
        .collect();

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut t = table(["#", "TYPE", "GROUP", "CHANNEL", "STATUS", "WORDS"]);
            for p in &out {
                t.add_row(vec![
                    p.index.to_string(),
                    p.message_type_name(),
                    optional(p.group),
                    optional(p.channel),
                    p.status.map_or_else(|| "-".to_string(), |s| format!("{s:#X}")),
                    p.words.join(" "),
                ]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            for p in &out {
                println!(
                    "[{}] {} group={} channel={} words={}",
                    p.index,
                    p.message_type_name(),
                    optional(p.group),
                    optional(p.channel),
                    p.words.join(" ")
                );
            }
        }
        OutputFormat::Raw => {
            for packet in &packets {
                println!("{}", hex_words(packet.words()));
            }
        }
    }
    Ok(SUCCESS)
}

impl PacketOutput {
    fn message_type_name(&self) -> String {
        self.message_type.name().to_string()
    }
}

fn describe(index: usize, packet: &Packet) -> PacketOutput {
    let word0 = packet.word0();
    let message_type = packet.message_type();
    let status = match message_type {
        MessageType::Utility => Some(u16::from(ump32_status(word0))),
        MessageType::SystemCommon => Some(u16::from(system_common_status(word0))),
        MessageType::Midi1ChannelVoice | MessageType::Midi2ChannelVoice => {
            Some(u16::from(channel_voice_status(word0)))
        }
        MessageType::Data64 => Some(u16::from(data64_status(word0))),
        MessageType::Data128 => Some(u16::from(data128_status(word0))),
        MessageType::FlexData => Some(u16::from(flex_data_status(word0))),
        MessageType::UmpStream => Some(stream_status(word0)),
        _ => None,
    };

    let is_stream = message_type == MessageType::UmpStream;
    let word1 = packet.words().get(1).copied().unwrap_or(0);
    PacketOutput {
        index,
        message_type,
        words: packet.words().iter().map(|w| format!("{w:08X}")).collect(),
        group: packet.group(),
        channel: packet.channel(),
        status,
        sysex7: sysex7_status(word0),
        sysex7_bytes: sysex7_status(word0).map(|_| data64_byte_count(word0)),
        stream_form: is_stream.then(|| stream_form(word0)),
        endpoint_info: (is_stream && stream_status(word0) == STATUS_ENDPOINT_INFO)
            .then(|| EndpointInfo::decode(word0, word1)),
        function_block_info: (is_stream && stream_status(word0) == STATUS_FUNCTION_BLOCK_INFO)
            .then(|| FunctionBlockInfo::decode(word0, word1)),
    }
}
