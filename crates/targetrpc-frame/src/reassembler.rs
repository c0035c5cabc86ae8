use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::checksum::Checksum;
use crate::codec::{FrameHeader, HEADER_SIZE};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingHeader,
    AwaitingBody(FrameHeader),
}

/// Counters kept by a [`Reassembler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerStats {
    /// Frames emitted.
    pub frames: u64,
    /// Bytes dropped while looking for a header.
    pub resync_bytes: u64,
    /// Headers rejected because the checksum did not match their body.
    pub checksum_failures: u64,
}

/// Turns an arbitrarily chunked byte stream into frame payloads.
///
/// Bytes are buffered until a full frame is present; nothing is emitted
/// early. When the buffer does not start with a valid header, exactly one
/// byte is dropped and the search repeats, so a stream that starts mid-frame
/// (or carries line noise) recovers at the next real header. A header whose
/// checksum does not match its body is treated the same way: only its first
/// byte is dropped, so a false match in noise cannot swallow the frames
/// behind it.
pub struct Reassembler {
    buf: BytesMut,
    state: State,
    checksum: Checksum,
    stats: ReassemblerStats,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(Checksum::default())
    }
}

impl Reassembler {
    pub fn new(checksum: Checksum) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: State::SeekingHeader,
            checksum,
            stats: ReassemblerStats::default(),
        }
    }

    /// Append `chunk` and emit every frame payload it completes, in order.
    ///
    /// Returns the number of payloads emitted by this call.
    pub fn feed<F>(&mut self, chunk: &[u8], mut emit: F) -> usize
    where
        F: FnMut(Bytes),
    {
        self.buf.extend_from_slice(chunk);
        let mut emitted = 0usize;

        loop {
            match self.state {
                State::SeekingHeader => {
                    if self.buf.len() < HEADER_SIZE {
                        break;
                    }
                    match FrameHeader::parse(&self.buf) {
                        Some(header) => self.state = State::AwaitingBody(header),
                        None => {
                            trace!(byte = self.buf[0], "no frame header, dropping one byte");
                            self.buf.advance(1);
                            self.stats.resync_bytes += 1;
                        }
                    }
                }
                State::AwaitingBody(header) => {
                    let total = header.frame_len();
                    if self.buf.len() < total {
                        break;
                    }

                    self.state = State::SeekingHeader;
                    let body = &self.buf[HEADER_SIZE..total];
                    if let Err(err) = self.checksum.verify(body, header.checksum) {
                        warn!(%err, len = header.length, "bad frame checksum, resyncing");
                        self.buf.advance(1);
                        self.stats.checksum_failures += 1;
                        self.stats.resync_bytes += 1;
                        continue;
                    }

                    let mut frame = self.buf.split_to(total);
                    frame.advance(HEADER_SIZE);
                    self.stats.frames += 1;
                    emitted += 1;
                    emit(frame.freeze());
                }
            }
        }

        emitted
    }

    /// Discard buffered bytes and go back to looking for a header.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::SeekingHeader;
    }

    /// Bytes buffered but not yet part of an emitted frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// True once a header has been parsed and the body is still incomplete.
    pub fn is_awaiting_body(&self) -> bool {
        matches!(self.state, State::AwaitingBody(_))
    }

    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }
}
