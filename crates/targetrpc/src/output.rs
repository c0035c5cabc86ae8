use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use targetrpc_frame::Hex;
use targetrpc_rpc::{PacketKind, RpcPacket};
use targetrpc_transport::PortInfo;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    kind: PacketKind,
    opcode: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_src: Option<u8>,
    payload_size: usize,
    payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    timestamp: String,
}

pub fn print_packet(packet: &RpcPacket, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                kind: packet.kind,
                opcode: packet.opcode,
                src: packet.addressing.map(|a| a.src),
                group_src: packet.addressing.map(|a| a.group_src),
                payload_size: packet.payload.len(),
                payload: Hex(&packet.payload).to_string(),
                text: payload_text(&packet.payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "OPCODE", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    packet.kind.to_string(),
                    format!("{:#04x}", packet.opcode),
                    packet.payload.len().to_string(),
                    Hex(&packet.payload).to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{packet}"),
    }
}

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial_number: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manufacturer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
}

/// Print serial ports; `devices[i]` is the bench device name for `ports[i]`.
pub fn print_ports(ports: &[PortInfo], devices: &[Option<String>], format: OutputFormat) {
    let rows = ports.iter().zip(devices).map(|(port, device)| PortOutput {
        name: &port.name,
        kind: port.kind(),
        serial_number: port.serial_number.as_deref(),
        manufacturer: port.manufacturer.as_deref(),
        device: device.as_deref(),
    });

    match format {
        OutputFormat::Json => {
            let rows: Vec<PortOutput<'_>> = rows.collect();
            println!(
                "{}",
                serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "TYPE", "SERIAL", "MANUFACTURER", "DEVICE"]);
            for row in rows {
                table.add_row(vec![
                    row.name,
                    row.kind,
                    row.serial_number.unwrap_or("-"),
                    row.manufacturer.unwrap_or("-"),
                    row.device.unwrap_or("-"),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!(
                    "{} ({}) serial={} device={}",
                    row.name,
                    row.kind,
                    row.serial_number.unwrap_or("-"),
                    row.device.unwrap_or("-")
                );
            }
        }
    }
}

/// Device log text, one output line per log line.
pub fn print_log(text: &str, format: OutputFormat) {
    for line in text.lines().filter(|line| !line.is_empty()) {
        match format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "log": line, "timestamp": now_unix_seconds() })
            ),
            OutputFormat::Table | OutputFormat::Pretty => println!("LOG {line}"),
        }
    }
}

fn payload_text(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload)
        .ok()
        .filter(|text| !text.is_empty() && !text.chars().any(|c| c.is_control() && c != '\n'))
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_payloads_get_text() {
        assert_eq!(payload_text(b"hello\n"), Some("hello\n"));
        assert_eq!(payload_text(b"\x00nrf"), None);
        assert_eq!(payload_text(b""), None);
        assert_eq!(payload_text(&[0xff, 0xfe]), None);
    }
}
