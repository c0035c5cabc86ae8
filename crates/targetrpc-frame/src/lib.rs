//! UART framing for devkit RPC links.
//!
//! Every packet on the wire is wrapped in a frame:
//! - A 4-byte magic ("UART") used to find frame boundaries
//! - A 2-byte little-endian payload length
//! - A 1-byte checksum over the payload
//!
//! The [`Reassembler`] turns an arbitrarily chunked byte stream back into
//! payloads, dropping one byte at a time until it finds a valid header again.
//! [`FrameLink`] runs that on a dedicated receive thread.

pub mod checksum;
pub mod codec;
pub mod error;
pub mod link;
pub mod reassembler;

pub use checksum::Checksum;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameHeader, Hex, HEADER_SIZE, MAGIC, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use link::{FrameLink, FrameSender, LinkConfig, PacketSink, READ_CHUNK_SIZE};
pub use reassembler::{Reassembler, ReassemblerStats};
