use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use targetrpc_frame::{Checksum, LinkConfig};
use targetrpc_rpc::{ChannelConfig, HandshakeConfig, HeaderShape, RpcChannel, DEFAULT_GROUP};
use targetrpc_transport::serial::DEFAULT_BAUD_RATE;
use targetrpc_transport::{open_serial, SerialConfig};

use crate::exit::{rpc_error, transport_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod command;
pub mod decode;
pub mod monitor;
pub mod ports;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports.
    Ports(PortsArgs),
    /// Decode captured link bytes into packets.
    Decode(DecodeArgs),
    /// Print events and device log lines from a live link.
    Monitor(MonitorArgs),
    /// Send one command and print the response.
    Cmd(CmdArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ports(args) => ports::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Cmd(args) => command::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum ShapeArg {
    /// 5-byte header with source and group addressing.
    #[default]
    Addressed,
    /// Legacy 3-byte header.
    Simple,
}

impl From<ShapeArg> for HeaderShape {
    fn from(shape: ShapeArg) -> Self {
        match shape {
            ShapeArg::Addressed => HeaderShape::Addressed,
            ShapeArg::Simple => HeaderShape::Simple,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum ChecksumArg {
    /// Checksum byte is written as zero and never checked.
    #[default]
    Placeholder,
    Crc8,
}

impl From<ChecksumArg> for Checksum {
    fn from(checksum: ChecksumArg) -> Self {
        match checksum {
            ChecksumArg::Placeholder => Checksum::Placeholder,
            ChecksumArg::Crc8 => Checksum::Crc8,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {
    /// Bench description; ports belonging to listed devices are labelled.
    #[arg(long, value_name = "FILE", env = "TARGETRPC_DEVCONF")]
    pub devconf: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Bytes in hex, e.g. `55 41 52 54 03 00 00 00 04 00`.
    #[arg(required = true, num_args = 1..)]
    pub hex: Vec<String>,
    #[arg(long, value_enum, default_value_t)]
    pub shape: ShapeArg,
    #[arg(long, value_enum, default_value_t)]
    pub checksum: ChecksumArg,
}

/// Options shared by commands that talk to a live device.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Serial port of the device.
    pub port: String,
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Disable RTS/CTS flow control.
    #[arg(long)]
    pub no_rtscts: bool,
    /// RPC group the firmware must announce.
    #[arg(long, default_value = DEFAULT_GROUP)]
    pub group: String,
    #[arg(long, value_enum, default_value_t)]
    pub shape: ShapeArg,
    #[arg(long, value_enum, default_value_t)]
    pub checksum: ChecksumArg,
    /// How long to wait for the device's INIT (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub establish_timeout: String,
}

impl LinkArgs {
    /// Open the port, start a channel and wait for the handshake.
    pub fn connect(&self) -> CliResult<RpcChannel> {
        let establish_timeout = parse_duration(&self.establish_timeout)?;
        let serial = self.serial_config();
        let stream = open_serial(&self.port, &serial)
            .map_err(|err| transport_error("open failed", err))?;

        let link = LinkConfig {
            checksum: self.checksum.into(),
            ..LinkConfig::for_serial(&serial)
        };
        let channel = RpcChannel::open(stream, link, self.channel_config())
            .map_err(|err| rpc_error("open failed", err))?;
        channel
            .wait_established(establish_timeout)
            .map_err(|err| rpc_error("handshake failed", err))?;
        Ok(channel)
    }

    fn serial_config(&self) -> SerialConfig {
        SerialConfig::default()
            .with_baud_rate(self.baud)
            .with_rtscts(!self.no_rtscts)
    }

    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            label: self.port.clone(),
            shape: self.shape.into(),
            handshake: HandshakeConfig::new(self.group.clone()),
        }
    }
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Exit after N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CmdArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Command opcode, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_opcode)]
    pub opcode: u16,
    /// Payload bytes in hex.
    #[arg(long, default_value = "")]
    pub data: String,
    /// Response timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Parse hex bytes. Tokens may be separated by whitespace, `,` or `:` and
/// carry a `0x` prefix; a long token is read two digits at a time.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in input.split(|c: char| c.is_whitespace() || c == ',' || c == ':') {
        let token = token.trim_start_matches("0x").trim_start_matches("0X");
        if token.is_empty() {
            continue;
        }
        if token.len() % 2 != 0 {
            return Err(CliError::usage(format!("odd number of hex digits in {token:?}")));
        }
        for pair in token.as_bytes().chunks(2) {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| CliError::usage(format!("invalid hex {token:?}")))?;
            let byte = u8::from_str_radix(digits, 16)
                .map_err(|_| CliError::usage(format!("invalid hex {token:?}")))?;
            bytes.push(byte);
        }
    }
    Ok(bytes)
}

fn parse_opcode(input: &str) -> Result<u16, String> {
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid opcode {input:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser, Debug)]
    struct LinkOnly {
        #[command(flatten)]
        link: LinkArgs,
    }

    fn link_args(args: &[&str]) -> LinkArgs {
        LinkOnly::try_parse_from(std::iter::once("targetrpc").chain(args.iter().copied()))
            .expect("link args should parse")
            .link
    }

    #[test]
    fn flow_control_is_on_unless_disabled() {
        let serial = link_args(&["/dev/ttyACM0"]).serial_config();
        assert!(serial.rtscts);
        assert_eq!(serial.baud_rate, DEFAULT_BAUD_RATE);

        let serial = link_args(&["/dev/ttyACM0", "--no-rtscts", "--baud", "115200"]).serial_config();
        assert!(!serial.rtscts);
        assert_eq!(serial.baud_rate, 115_200);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn parse_hex_accepts_common_spellings() {
        assert_eq!(parse_hex("55 41 52 54").unwrap(), b"UART");
        assert_eq!(parse_hex("55415254").unwrap(), b"UART");
        assert_eq!(parse_hex("0x55,0x41:52  54").unwrap(), b"UART");
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn parse_hex_rejects_bad_digits() {
        assert_eq!(parse_hex("5").unwrap_err().code, crate::exit::USAGE);
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn parse_opcode_decimal_and_hex() {
        assert_eq!(parse_opcode("7"), Ok(7));
        assert_eq!(parse_opcode("0x1f"), Ok(0x1f));
        assert!(parse_opcode("0x10000").is_err());
    }
}
