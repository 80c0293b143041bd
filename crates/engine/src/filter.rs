//! Offset-aware stream filter with the first-chunk fingerprint check.

use bytes::Bytes;
use upwell_protocol::Fingerprint;

/// Result of the first-chunk fingerprint check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstChunk {
    /// No fingerprint was stored for the active session uri; this one was
    /// just captured and must be persisted alongside the uri.
    Captured(Fingerprint),
    /// The stored fingerprint matches: the resumed stream is the same
    /// content the session was opened for.
    Match,
    /// The stored fingerprint differs byte-exact: the session belongs to
    /// different content. The chunk is left unconsumed and the session must
    /// restart with a fresh uri.
    Mismatch,
}

/// Transforms the logical input stream into the bytes actually transmitted.
///
/// Owns the session's two running counters: `bytes_written` (input observed
/// so far, including bytes that were not forwarded) and `offset` (bytes the
/// server has durably confirmed). A fresh filter is built per upload
/// attempt; on an in-session retry it is seeded with the replay-buffer
/// origin so the arithmetic continues where the retained chunks begin.
#[derive(Debug)]
pub struct ChunkOffsetFilter {
    offset: u64,
    bytes_written: u64,
    fingerprint: Option<Fingerprint>,
}

impl ChunkOffsetFilter {
    /// Creates a filter for one upload attempt.
    ///
    /// `start` seeds `bytes_written` with the absolute position of the first
    /// chunk that will be offered: 0 on a fresh session or a
    /// resumed-from-restart stream, the replay origin on a retry.
    pub fn new(start: u64, offset: u64, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            offset,
            bytes_written: start,
            fingerprint,
        }
    }

    /// Runs the fingerprint check against the very first chunk of content.
    ///
    /// Only meaningful while `bytes_written == 0`; the controller invokes it
    /// before any chunk is offered, so a mismatch is detected before a
    /// single byte reaches the wire.
    pub fn check_first(&mut self, chunk: &[u8]) -> FirstChunk {
        let computed = Fingerprint::of_first_chunk(chunk);
        match &self.fingerprint {
            None => {
                self.fingerprint = Some(computed.clone());
                FirstChunk::Captured(computed)
            }
            Some(stored) if *stored == computed => FirstChunk::Match,
            Some(_) => FirstChunk::Mismatch,
        }
    }

    /// Trims a chunk against the confirmed offset and returns the bytes to
    /// forward (possibly none).
    ///
    /// The full chunk length is always added to `bytes_written`, whether or
    /// not any of it was forwarded; offsets that fall inside a chunk work
    /// out from the same arithmetic.
    pub fn offer(&mut self, chunk: Bytes) -> Bytes {
        let written = self.bytes_written;
        let len = chunk.len() as u64;
        self.bytes_written = written + len;
        if written >= self.offset {
            return chunk;
        }
        let skip = (self.offset - written).min(len) as usize;
        chunk.slice(skip..)
    }

    /// Bytes of input observed so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// The server-confirmed offset this filter trims against.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
