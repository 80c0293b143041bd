//! Producer-side plumbing: the write handle, the event stream, and the
//! replay buffer that feeds chunk-upload request bodies.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use upwell_protocol::Response;

use crate::error::UploadError;
use crate::filter::ChunkOffsetFilter;
use crate::transport::ByteStream;

/// Notifications emitted while a session runs.
///
/// Best-effort: if the consumer never drains the event receiver the
/// controller drops events rather than stall the upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// A session uri is active, freshly created or recovered from the store.
    SessionActive { session_uri: String },
    /// A response was observed on the wire, including ones the engine
    /// retries internally. [`Response::json`] gives the parsed body when
    /// there is one.
    Response(Response),
    /// The server durably confirmed bytes up to this offset.
    OffsetConfirmed { offset: u64 },
}

/// Write side of an upload session.
///
/// Chunks written here are forwarded to the server in order. Dropping the
/// sink ends the input stream, which lets the in-flight request body finish
/// and the session run to completion.
pub struct UploadSink {
    tx: mpsc::Sender<Bytes>,
}

impl UploadSink {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Queues one chunk of content. Empty chunks are ignored.
    ///
    /// Applies backpressure when the session's chunk buffer is full. Fails
    /// with [`UploadError::Closed`] once the session has terminated.
    pub async fn write(&self, chunk: Bytes) -> Result<(), UploadError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(chunk).await.map_err(|_| UploadError::Closed)
    }

    /// Writes one whole buffer and ends the input, for producers that have
    /// the full content in memory.
    pub async fn write_all(self, data: impl Into<Bytes>) -> Result<(), UploadError> {
        self.write(data.into()).await
    }
}

/// Consumer-side handle for a running session.
pub struct UploadHandle {
    events: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<u64, UploadError>>,
}

impl UploadHandle {
    pub(crate) fn new(
        events: mpsc::Receiver<UploadEvent>,
        cancel: CancellationToken,
        task: JoinHandle<Result<u64, UploadError>>,
    ) -> Self {
        Self {
            events: Some(events),
            cancel,
            task,
        }
    }

    /// Takes the event receiver. Returns `None` on the second call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events.take()
    }

    /// Token that aborts the session when cancelled.
    ///
    /// Cancellation is cooperative: the resume record is left in place so a
    /// later session can pick the upload back up.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the session to terminate and returns the total object size
    /// on success.
    pub async fn join(self) -> Result<u64, UploadError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(join) => Err(UploadError::Internal(join.to_string())),
        }
    }
}

/// Input plumbing for one session: the live producer channel plus the
/// replay buffer of chunks the server has not yet confirmed.
///
/// `pending` holds every chunk observed since the last confirmed offset at
/// or past `pending_start`, in order. A retried request body replays the
/// buffer before drawing new input, so a failed request never loses bytes
/// the producer already handed over.
pub(crate) struct PipelineIo {
    rx: mpsc::Receiver<Bytes>,
    pending: VecDeque<Bytes>,
    pending_start: u64,
    input_done: bool,
}

impl PipelineIo {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            pending_start: 0,
            input_done: false,
        }
    }

    /// Absolute position of the first buffered chunk.
    pub(crate) fn pending_start(&self) -> u64 {
        self.pending_start
    }

    /// Returns the first chunk of content without consuming it, waiting on
    /// the producer if nothing is buffered yet. `None` means the input ended
    /// before any content arrived.
    pub(crate) async fn peek_first(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() && !self.input_done {
            match self.rx.recv().await {
                Some(chunk) => self.pending.push_back(chunk),
                None => self.input_done = true,
            }
        }
        self.pending.front().cloned()
    }

    /// Releases buffered chunks that fall entirely below the confirmed
    /// offset. A chunk straddling the boundary is kept whole; the filter
    /// trims it again on replay.
    pub(crate) fn trim_confirmed(&mut self, confirmed: u64) {
        while let Some(front) = self.pending.front() {
            let end = self.pending_start + front.len() as u64;
            if end > confirmed {
                break;
            }
            self.pending_start = end;
            self.pending.pop_front();
        }
        if !self.pending.is_empty() {
            debug!(
                retained = self.pending.len(),
                start = self.pending_start,
                "retaining unconfirmed chunks"
            );
        }
    }
}

/// Drives one request body: replays the buffer through the filter, then
/// forwards live producer input until the input ends, the receiving side of
/// `body_tx` goes away, or `stop` fires.
///
/// Every live chunk is appended to the buffer before it is offered, so the
/// buffer stays a faithful prefix-complete record of unconfirmed input.
pub(crate) async fn feed_body(
    io: &mut PipelineIo,
    filter: &mut ChunkOffsetFilter,
    body_tx: mpsc::Sender<Bytes>,
    stop: CancellationToken,
) {
    let mut replayed = 0;
    loop {
        let chunk = if replayed < io.pending.len() {
            let chunk = io.pending[replayed].clone();
            replayed += 1;
            chunk
        } else if io.input_done {
            break;
        } else {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = io.rx.recv() => match received {
                    Some(chunk) => {
                        io.pending.push_back(chunk.clone());
                        replayed += 1;
                        chunk
                    }
                    None => {
                        io.input_done = true;
                        break;
                    }
                },
            }
        };

        let outgoing = filter.offer(chunk);
        if outgoing.is_empty() {
            continue;
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            sent = body_tx.send(outgoing) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

/// Adapts the body channel's receiver into the transport's stream type.
pub(crate) fn receiver_stream(rx: mpsc::Receiver<Bytes>) -> ByteStream {
    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    fn io_with(chunks: &[&[u8]], pending_start: u64) -> PipelineIo {
        let (_tx, rx) = mpsc::channel(1);
        let mut io = PipelineIo::new(rx);
        io.pending = chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect();
        io.pending_start = pending_start;
        io.input_done = true;
        io
    }

    async fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn trim_releases_only_fully_confirmed_chunks() {
        let mut io = io_with(&[b"aaaa", b"bbbb", b"cccc"], 0);
        io.trim_confirmed(6);
        // "bbbb" straddles offset 6 and must stay whole.
        assert_eq!(io.pending_start(), 4);
        assert_eq!(io.pending.len(), 2);

        io.trim_confirmed(12);
        assert_eq!(io.pending_start(), 12);
        assert!(io.pending.is_empty());
    }

    #[tokio::test]
    async fn trim_below_pending_start_is_a_no_op() {
        let mut io = io_with(&[b"aaaa"], 100);
        io.trim_confirmed(50);
        assert_eq!(io.pending_start(), 100);
        assert_eq!(io.pending.len(), 1);
    }

    #[tokio::test]
    async fn feed_forwards_live_input_and_buffers_it() {
        let (tx, rx) = mpsc::channel(4);
        let mut io = PipelineIo::new(rx);
        let mut filter = ChunkOffsetFilter::new(0, 0, None);
        let (body_tx, mut body_rx) = mpsc::channel(4);

        tx.send(Bytes::from_static(b"hello ")).await.unwrap();
        tx.send(Bytes::from_static(b"world")).await.unwrap();
        drop(tx);

        feed_body(&mut io, &mut filter, body_tx, CancellationToken::new()).await;
        assert_eq!(drain(&mut body_rx).await, b"hello world");
        // Nothing is confirmed yet, so everything stays buffered.
        assert_eq!(io.pending.len(), 2);
        assert_eq!(filter.bytes_written(), 11);
    }

    #[tokio::test]
    async fn feed_replays_the_buffer_with_confirmed_bytes_trimmed() {
        // 4 bytes confirmed out of a buffer starting at 0; the replayed body
        // must begin at byte 4.
        let mut io = io_with(&[b"aaaa", b"bbbb"], 0);
        let mut filter = ChunkOffsetFilter::new(io.pending_start(), 4, None);
        let (body_tx, mut body_rx) = mpsc::channel(4);

        feed_body(&mut io, &mut filter, body_tx, CancellationToken::new()).await;
        assert_eq!(drain(&mut body_rx).await, b"bbbb");
    }

    #[tokio::test]
    async fn feed_stops_when_the_stop_token_fires() {
        let (tx, rx) = mpsc::channel(4);
        let mut io = PipelineIo::new(rx);
        let mut filter = ChunkOffsetFilter::new(0, 0, None);
        let (body_tx, _body_rx) = mpsc::channel(4);

        let stop = CancellationToken::new();
        stop.cancel();
        feed_body(&mut io, &mut filter, body_tx, stop).await;
        // The producer channel is still open; only the token ended the feed.
        drop(tx);
    }

    #[tokio::test]
    async fn peek_first_does_not_consume() {
        let (tx, rx) = mpsc::channel(4);
        let mut io = PipelineIo::new(rx);
        tx.send(Bytes::from_static(b"first")).await.unwrap();
        drop(tx);

        assert_eq!(io.peek_first().await.as_deref(), Some(&b"first"[..]));
        assert_eq!(io.peek_first().await.as_deref(), Some(&b"first"[..]));
        assert_eq!(io.pending.len(), 1);
    }

    #[tokio::test]
    async fn peek_first_reports_empty_input() {
        let (tx, rx) = mpsc::channel::<Bytes>(4);
        let mut io = PipelineIo::new(rx);
        drop(tx);
        assert!(io.peek_first().await.is_none());
        assert!(io.input_done);
    }

    #[tokio::test]
    async fn sink_drops_empty_chunks() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = UploadSink::new(tx);
        sink.write(Bytes::new()).await.unwrap();
        sink.write(Bytes::from_static(b"data")).await.unwrap();
        drop(sink);
        assert_eq!(rx.recv().await.as_deref(), Some(&b"data"[..]));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn write_all_sends_the_buffer_and_ends_the_input() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = UploadSink::new(tx);
        sink.write_all(&b"whole buffer"[..]).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some(&b"whole buffer"[..]));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn sink_write_fails_after_session_end() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sink = UploadSink::new(tx);
        let err = sink.write(Bytes::from_static(b"late")).await.unwrap_err();
        assert!(matches!(err, UploadError::Closed));
    }

    #[tokio::test]
    async fn receiver_stream_yields_until_channel_closes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"a")).await.unwrap();
        tx.send(Bytes::from_static(b"b")).await.unwrap();
        drop(tx);

        let mut stream = receiver_stream(rx);
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, b"ab");
    }
}
