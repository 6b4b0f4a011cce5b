#![cfg(feature = "cli")]

use std::path::PathBuf;
use std::process::{Command, Output};

fn umploop(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_umploop"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("umploop should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn unique_temp_file(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "umploop-{tag}-{}-{}.json",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

#[test]
fn version_prints_package_version() {
    let output = umploop(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        format!("umploop {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn decode_outputs_json_packets() {
    let output = umploop(&["--format", "json", "decode", "40903C40", "7F000000", "0x20903c40"]);
    assert!(output.status.success());

    let packets: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("decode output should be JSON");
    let packets = packets.as_array().expect("array of packets");
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0]["message_type"], "midi2_channel_voice");
    assert_eq!(packets[0]["words"][1], "7F000000");
    assert_eq!(packets[1]["message_type"], "midi1_channel_voice");
    assert_eq!(packets[1]["channel"], 0);
}

#[test]
fn decode_truncated_packet_returns_60() {
    let output = umploop(&["--format", "json", "decode", "20903C40", "40903C40"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("truncated packet"));
}

#[test]
fn decode_bad_hex_returns_64() {
    let output = umploop(&["decode", "not-hex"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn guard_reports_termination() {
    let output = umploop(&[
        "--format", "json", "guard", "30160001", "02030405", "20903C40",
    ]);
    assert!(output.status.success());
    let out: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("JSON output");
    assert_eq!(out["terminated"], 1);
    assert_eq!(out["steps"][1]["verdict"], "terminated");
    assert_eq!(out["steps"][1]["admissible"], false);
}

#[test]
fn guard_strict_fails_on_termination() {
    let output = umploop(&[
        "--format", "raw", "guard", "--strict", "30160001", "02030405", "20903C40",
    ]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn guard_strict_passes_clean_stream() {
    let output = umploop(&[
        "--format", "raw", "guard", "--strict", "30160001", "02030405", "21903C40", "30330001",
        "02000000",
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("2 closed"));
}

#[test]
fn loopback_streams_every_packet() {
    let output = umploop(&[
        "--format", "json", "loopback", "--count", "2000", "--buffer-size", "64", "--sysex", "40",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let out: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("JSON output");
    assert_eq!(out["mode"], "local");
    assert_eq!(out["capacity"], 64);
    assert_eq!(out["sent"], 2007);
    assert_eq!(out["received"], 2007);
    assert_eq!(out["in_order"], true);
    assert_eq!(out["validation_errors"], 0);
}

#[test]
fn loopback_through_device_service() {
    let output = umploop(&["--format", "json", "loopback", "--count", "100", "--service"]);
    assert!(output.status.success());
    let out: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("JSON output");
    assert_eq!(out["mode"], "service");
    assert_eq!(out["received"], 100);
}

#[test]
fn loopback_reads_config_file() {
    let path = unique_temp_file("config");
    std::fs::write(
        &path,
        r#"{"stream": {"buffer_size": 300, "negotiation_timeout_ms": 1000}, "device": {"max_buffer_size": 4096}}"#,
    )
    .expect("config should be writable");

    let output = umploop(&[
        "--format",
        "json",
        "loopback",
        "--count",
        "10",
        "--config",
        path.to_str().expect("utf-8 temp path"),
    ]);
    let _ = std::fs::remove_file(&path);

    assert!(output.status.success());
    let out: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("JSON output");
    assert_eq!(out["capacity"], 320);
}

#[test]
fn loopback_oversized_buffer_is_transport_error() {
    let path = unique_temp_file("small-device");
    std::fs::write(&path, r#"{"device": {"max_buffer_size": 128}}"#).expect("config should be writable");

    let output = umploop(&[
        "loopback",
        "--buffer-size",
        "1024",
        "--config",
        path.to_str().expect("utf-8 temp path"),
    ]);
    let _ = std::fs::remove_file(&path);

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("exceeds device maximum"));
}

#[test]
fn loopback_rejects_zero_timeout() {
    let output = umploop(&["loopback", "--timeout", "0ms"]);
    assert_eq!(output.status.code(), Some(64));
}
