#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

fn targetrpc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_targetrpc"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("targetrpc should run")
}

#[test]
fn decode_prints_event_as_json() {
    let output = targetrpc(&[
        "--format",
        "json",
        "decode",
        "01 02 03",
        "55 41 52 54 07 00 00",
        "00 04 ff 00 ff 01 02",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"kind\":\"EVT\""));
    assert!(stdout.contains("\"opcode\":4"));
    assert!(stdout.contains("\"payload\":\"01 02\""));
}

#[test]
fn decode_pretty_uses_packet_display() {
    let output = targetrpc(&[
        "--format",
        "pretty",
        "decode",
        "55415254050000",
        "04 3412 aabb",
        "--shape",
        "simple",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "EVT 1234 LEN 2 DATA aa bb");
}

#[test]
fn decode_without_frames_returns_60() {
    let output = targetrpc(&["--format", "json", "decode", "de ad be ef"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(output.stdout.is_empty());
}

#[test]
fn decode_bad_hex_returns_64() {
    let output = targetrpc(&["decode", "5"]);
    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("odd number of hex digits"));
}

#[test]
fn crc8_rejects_placeholder_checksum() {
    // Valid frame under the placeholder scheme, but its checksum byte is 0.
    let output = targetrpc(&[
        "decode",
        "--checksum",
        "crc8",
        "55 41 52 54 07 00 00 00 04 ff 00 ff 01 02",
    ]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn cmd_on_missing_port_is_a_transport_error() {
    let output = targetrpc(&[
        "cmd",
        "/dev/targetrpc-does-not-exist",
        "--opcode",
        "1",
        "--establish-timeout",
        "100ms",
    ]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("open failed"));
}

#[test]
fn version_prints_name() {
    let output = targetrpc(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("targetrpc "));

    let output = targetrpc(&["version", "--extended"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("group=nrf_pytest"));
}
