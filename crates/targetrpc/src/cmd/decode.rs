use targetrpc_frame::Reassembler;
use targetrpc_rpc::{HeaderShape, RpcPacket};
use tracing::{info, warn};

use crate::cmd::{parse_hex, DecodeArgs};
use crate::exit::{CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex.join(" "))?;
    let (packets, undecodable) = decode(&bytes, args.checksum.into(), args.shape.into());

    for packet in &packets {
        print_packet(packet, format);
    }
    if undecodable > 0 {
        warn!(frames = undecodable, "frames with undecodable packet headers");
    }
    if packets.is_empty() {
        info!(bytes = bytes.len(), "no packets found");
        return Ok(DATA_INVALID);
    }
    Ok(SUCCESS)
}

/// Run `bytes` through a fresh reassembler. Returns decoded packets and the
/// number of frames whose payload was not a valid packet.
fn decode(
    bytes: &[u8],
    checksum: targetrpc_frame::Checksum,
    shape: HeaderShape,
) -> (Vec<RpcPacket>, usize) {
    let mut reassembler = Reassembler::new(checksum);
    let mut packets = Vec::new();
    let mut undecodable = 0usize;

    reassembler.feed(bytes, |payload| match RpcPacket::decode(payload, shape) {
        Ok(packet) => packets.push(packet),
        Err(err) => {
            warn!(error = %err, "frame payload is not a packet");
            undecodable += 1;
        }
    });

    if reassembler.pending() > 0 {
        warn!(bytes = reassembler.pending(), "trailing partial frame");
    }
    (packets, undecodable)
}
