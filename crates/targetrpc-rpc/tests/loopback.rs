#![cfg(unix)]

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use targetrpc_frame::{encode_frame, Checksum, LinkConfig, Reassembler};
use targetrpc_rpc::{
    Addressing, ChannelConfig, ChannelState, HeaderShape, PacketKind, RpcChannel, RpcError,
    RpcPacket, BROADCAST,
};
use targetrpc_transport::ByteStream;

const WAIT: Duration = Duration::from_secs(3);

const INIT_FRAME: [u8; 23] = [
    0x55, 0x41, 0x52, 0x54, 0x10, 0x00, 0x00, 0x04, 0x00, 0xff, 0x00, 0xff, 0x00, 0x6e, 0x72, 0x66,
    0x5f, 0x70, 0x79, 0x74, 0x65, 0x73, 0x74,
];

fn frame(packet: RpcPacket) -> Vec<u8> {
    let packet = packet.with_addressing(Addressing {
        src: 0,
        dst: BROADCAST,
        group_src: 0,
        group_dst: BROADCAST,
    });
    let mut buf = BytesMut::new();
    encode_frame(
        &packet.encode(HeaderShape::Addressed).unwrap(),
        Checksum::Placeholder,
        &mut buf,
    )
    .unwrap();
    buf.to_vec()
}

/// Plays the firmware side: announces itself, answers one command with an
/// event and a response, then reports everything it received.
fn simulated_device(mut stream: ByteStream, seen: mpsc::Sender<RpcPacket>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        // Line noise before the first frame.
        stream
            .write_all_timeout(&[0x00, 0x13, 0x37], WAIT)
            .unwrap();
        stream.write_all_timeout(&INIT_FRAME, WAIT).unwrap();

        let mut reassembler = Reassembler::new(Checksum::Placeholder);
        let mut chunk = [0u8; 64];
        let deadline = Instant::now() + WAIT;

        while Instant::now() < deadline {
            let n = match stream.read_chunk(&mut chunk, Duration::from_millis(10)) {
                Ok(n) => n,
                Err(_) => return,
            };
            let mut payloads: Vec<Bytes> = Vec::new();
            reassembler.feed(&chunk[..n], |payload| payloads.push(payload));

            for payload in payloads {
                let packet = RpcPacket::decode(payload, HeaderShape::Addressed).unwrap();
                let _ = seen.send(packet.clone());

                if packet.kind == PacketKind::Cmd {
                    let mut reply = frame(RpcPacket::new(PacketKind::Evt, 0x04, &b"scan"[..]));
                    reply.extend(frame(RpcPacket::new(
                        PacketKind::Rsp,
                        packet.opcode,
                        &b"ok"[..],
                    )));
                    stream.write_all_timeout(&reply, WAIT).unwrap();
                }
            }
        }
    })
}

#[test]
fn command_and_event_over_loopback() {
    let (host, device) = ByteStream::pair().unwrap();
    let (seen_tx, seen_rx) = mpsc::channel();
    let firmware = simulated_device(device, seen_tx);

    let channel = RpcChannel::open(
        host,
        LinkConfig::default(),
        ChannelConfig {
            label: "loopback".into(),
            ..ChannelConfig::default()
        },
    )
    .unwrap();

    channel.wait_established(WAIT).unwrap();
    assert_eq!(channel.state(), ChannelState::Established);

    let rsp = channel.cmd(0x01, &b"adv"[..], WAIT).unwrap();
    assert_eq!(rsp.kind, PacketKind::Rsp);
    assert_eq!(rsp.payload.as_ref(), b"ok");

    let event = channel.get_evt(WAIT).unwrap();
    assert_eq!(event.opcode, 0x04);
    assert_eq!(event.payload.as_ref(), b"scan");

    // INIT answer, the command, then the ACK for the event.
    let init = seen_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(init.kind, PacketKind::Init);
    assert_eq!(init.payload.as_ref(), b"\x00nrf_pytest");

    let cmd = seen_rx.recv_timeout(WAIT).unwrap();
    assert_eq!((cmd.kind, cmd.opcode), (PacketKind::Cmd, 0x01));
    assert_eq!(cmd.payload.as_ref(), b"adv");

    let ack = seen_rx.recv_timeout(WAIT).unwrap();
    assert_eq!((ack.kind, ack.opcode), (PacketKind::Ack, 0x04));

    channel.close();
    assert!(matches!(
        channel.get_evt(Duration::from_millis(10)),
        Err(RpcError::Closed)
    ));
    drop(channel);
    firmware.join().unwrap();
}

#[test]
fn silent_device_times_out_command() {
    let (host, _device) = ByteStream::pair().unwrap();
    let channel = RpcChannel::open(host, LinkConfig::default(), ChannelConfig::default()).unwrap();

    let err = channel
        .cmd(0x02, Bytes::new(), Duration::from_millis(150))
        .unwrap_err();
    assert!(matches!(err, RpcError::CommandTimeout { opcode: 0x02, .. }));
    assert_eq!(channel.state(), ChannelState::Disconnected);
}
