use std::time::Duration;

use targetrpc_rpc::{RpcChannel, RpcPacket};
use tracing::debug;

use crate::cmd::{parse_duration, parse_hex, CmdArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: CmdArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = parse_hex(&args.data)?;

    let channel = args.link.connect()?;
    let response = execute(&channel, args.opcode, payload, timeout)?;
    print_packet(&response, format);
    channel.close();
    Ok(SUCCESS)
}

fn execute(
    channel: &RpcChannel,
    opcode: u16,
    payload: Vec<u8>,
    timeout: Duration,
) -> CliResult<RpcPacket> {
    debug!(opcode, bytes = payload.len(), "sending command");
    channel
        .cmd(opcode, payload, timeout)
        .map_err(|err| rpc_error("command failed", err))
}
