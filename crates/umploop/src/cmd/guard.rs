use serde::Serialize;
use umploop_packet::{MessageType, Packet, SysExSession, Verdict};

use crate::cmd::{parse_words, split_packets, GuardArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{hex_words, optional, print_json, table, OutputFormat};

#[derive(Debug, Serialize)]
struct GuardStep {
    index: usize,
    message_type: MessageType,
    words: String,
    group: Option<u8>,
    admissible: bool,
    verdict: &'static str,
    open_groups: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct GuardOutput {
    steps: Vec<GuardStep>,
    terminated: usize,
    still_open: Vec<u8>,
}

pub fn run(args: GuardArgs, format: OutputFormat) -> CliResult<i32> {
    let words = parse_words(&args.words)?;
    let packets = split_packets(&words)?;
    let out = evaluate(&packets);

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut t = table(["#", "WORDS", "GROUP", "ADMISSIBLE", "VERDICT", "OPEN"]);
            for step in &out.steps {
                t.add_row(vec![
                    step.index.to_string(),
                    step.words.clone(),
                    optional(step.group),
                    step.admissible.to_string(),
                    step.verdict.to_string(),
                    join_groups(&step.open_groups),
                ]);
            }
            println!("{t}");
            println!(
                "terminated: {}  still open: {}",
                out.terminated,
                join_groups(&out.still_open)
            );
        }
        OutputFormat::Raw => {
            for step in &out.steps {
                println!("{} {}", step.index, step.verdict);
            }
        }
    }

    if args.strict && out.terminated > 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{} SysEx7 stream(s) terminated by interleaved packets", out.terminated),
        ));
    }
    Ok(SUCCESS)
}

fn evaluate(packets: &[Packet]) -> GuardOutput {
    let mut session = SysExSession::new();
    let mut terminated = 0;
    let steps = packets
        .iter()
        .enumerate()
        .map(|(index, packet)| {
            let admissible = session.check(packet.word0());
            let verdict = match session.observe(packet.word0()) {
                Verdict::Pass => "pass",
                Verdict::Opened(_) => "opened",
                Verdict::Closed(_) => "closed",
                Verdict::Terminated(_) => {
                    terminated += 1;
                    "terminated"
                }
            };
            GuardStep {
                index,
                message_type: packet.message_type(),
                words: hex_words(packet.words()),
                group: packet.group(),
                admissible,
                verdict,
                open_groups: open_groups(&session),
            }
        })
        .collect();

    GuardOutput {
        steps,
        terminated,
        still_open: open_groups(&session),
    }
}

fn open_groups(session: &SysExSession) -> Vec<u8> {
    (0..umploop_packet::GROUP_COUNT as u8)
        .filter(|g| session.is_open(*g))
        .collect()
}

fn join_groups(groups: &[u8]) -> String {
    if groups.is_empty() {
        return "-".to_string();
    }
    groups
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
