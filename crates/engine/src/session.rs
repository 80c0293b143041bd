//! The session controller: drives one upload from first byte to terminal
//! outcome.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use upwell_protocol::{
    HEADER_LOCATION, HEADER_RANGE, Request, Response, ResumeRecord, STATUS_RESUME_INCOMPLETE,
    UploadTarget, chunk_upload_request, initiate_request, offset_query_request, parse_range_end,
};
use upwell_store::SessionStore;

use crate::error::UploadError;
use crate::filter::{ChunkOffsetFilter, FirstChunk};
use crate::pipeline::{
    PipelineIo, UploadEvent, UploadHandle, UploadSink, feed_body, receiver_stream,
};
use crate::retry::{RetryAction, RetryPolicy};
use crate::transport::{Authorizer, Transport};

/// Default service endpoint for session initiation.
pub const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Tuning knobs for upload sessions.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Base url the initiation request is built against.
    pub base_url: String,
    /// Capacity, in chunks, of the producer channel and of each request
    /// body channel.
    pub buffer_chunks: usize,
    /// Capacity of the notification channel. Events past a full channel
    /// are dropped rather than stalling the upload; size it for the
    /// consumer's drain rate when every notification matters.
    pub event_capacity: usize,
    /// Retry classification and backoff parameters.
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            buffer_chunks: 16,
            event_capacity: 32,
            retry: RetryPolicy::default(),
        }
    }
}

/// Entry point: starts upload sessions against a transport, an authorizer,
/// and a resume-record store.
pub struct Uploader {
    transport: Arc<dyn Transport>,
    authorizer: Arc<dyn Authorizer>,
    store: Arc<dyn SessionStore>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(
        transport: Arc<dyn Transport>,
        authorizer: Arc<dyn Authorizer>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            transport,
            authorizer,
            store,
            config: UploadConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts a session for `target` and returns the producer sink plus the
    /// consumer handle. Must be called within a tokio runtime.
    ///
    /// The session runs until the input ends and the server acknowledges the
    /// object, or until a terminal error; [`UploadHandle::join`] reports
    /// which.
    pub fn start(&self, target: UploadTarget) -> Result<(UploadSink, UploadHandle), UploadError> {
        if target.bucket.is_empty() || target.object.is_empty() {
            return Err(UploadError::InvalidTarget);
        }
        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.buffer_chunks);
        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);
        let cancel = CancellationToken::new();

        let controller = SessionController {
            transport: self.transport.clone(),
            authorizer: self.authorizer.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            key: target.record_key(),
            target,
            cancel: cancel.clone(),
            events: event_tx,
            io: PipelineIo::new(chunk_rx),
            state: State::New,
            session_uri: None,
            fingerprint: None,
            offset: 0,
            retry_count: 0,
        };
        let task = tokio::spawn(controller.run());
        Ok((
            UploadSink::new(chunk_tx),
            UploadHandle::new(event_rx, cancel, task),
        ))
    }
}

/// Where the controller is in a session's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Consulting the store for an existing record.
    New,
    /// Requesting a session uri from the service.
    Initiating,
    /// Confirming the server-side offset for an existing uri.
    OffsetQuery,
    /// Offset confirmed; about to continue the interrupted stream.
    Resuming,
    /// A chunk upload request is being prepared or is in flight.
    Uploading,
    /// The stored session belongs to different content; discarding it.
    Restarting,
}

struct SessionController {
    transport: Arc<dyn Transport>,
    authorizer: Arc<dyn Authorizer>,
    store: Arc<dyn SessionStore>,
    config: UploadConfig,
    target: UploadTarget,
    key: String,
    cancel: CancellationToken,
    events: mpsc::Sender<UploadEvent>,
    io: PipelineIo,
    state: State,
    session_uri: Option<String>,
    fingerprint: Option<upwell_protocol::Fingerprint>,
    /// Bytes the server has durably confirmed.
    offset: u64,
    /// Cumulative retryable failures consumed so far. Never reset, not even
    /// by a content-mismatch restart.
    retry_count: u32,
}

impl SessionController {
    async fn run(mut self) -> Result<u64, UploadError> {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                // The record stays behind so a later session can resume.
                info!(key = %self.key, "upload cancelled");
                Err(UploadError::Cancelled)
            }
            outcome = self.drive() => outcome,
        }
    }

    async fn drive(&mut self) -> Result<u64, UploadError> {
        loop {
            match self.state {
                State::New => self.on_new()?,
                State::Initiating => self.initiate().await?,
                State::OffsetQuery => self.query_offset().await?,
                State::Resuming => self.resume(),
                State::Uploading => {
                    if let Some(total) = self.upload().await? {
                        return Ok(total);
                    }
                }
                State::Restarting => self.restart()?,
            }
        }
    }

    fn on_new(&mut self) -> Result<(), UploadError> {
        match self.store.get(&self.key)? {
            Some(record) => {
                info!(key = %self.key, uri = %record.session_uri, "found stored session");
                self.emit(UploadEvent::SessionActive {
                    session_uri: record.session_uri.clone(),
                });
                self.session_uri = Some(record.session_uri);
                self.fingerprint = record.fingerprint;
                self.state = State::OffsetQuery;
            }
            None => self.state = State::Initiating,
        }
        Ok(())
    }

    async fn initiate(&mut self) -> Result<(), UploadError> {
        debug!(key = %self.key, "initiating session");
        let request = initiate_request(&self.config.base_url, &self.target);
        let response = self.send_buffered(request).await?;
        match self.config.retry.classify(response.status, self.retry_count) {
            RetryAction::RetryNow => self.note_retry(response.status),
            RetryAction::RetryAfter(delay) => {
                self.note_retry(response.status);
                // No uri exists yet, so there is no offset to re-confirm;
                // the initiation itself is repeated after the delay.
                tokio::time::sleep(delay).await;
            }
            RetryAction::GiveUp => return Err(UploadError::RetryLimitExceeded),
            RetryAction::Proceed => {
                if !response.is_success() {
                    return Err(UploadError::Failed {
                        status: response.status,
                    });
                }
                let uri = response
                    .header(HEADER_LOCATION)
                    .ok_or(UploadError::MissingSessionUri)?
                    .to_string();
                info!(key = %self.key, uri = %uri, "session initiated");
                self.store.set(
                    &self.key,
                    &ResumeRecord {
                        session_uri: uri.clone(),
                        fingerprint: self.fingerprint.clone(),
                    },
                )?;
                self.emit(UploadEvent::SessionActive {
                    session_uri: uri.clone(),
                });
                self.session_uri = Some(uri);
                self.state = State::Uploading;
            }
        }
        Ok(())
    }

    async fn query_offset(&mut self) -> Result<(), UploadError> {
        let uri = self.session_uri()?.to_string();
        debug!(key = %self.key, "querying persisted offset");
        let response = self.send_buffered(offset_query_request(&uri)).await?;
        match self.config.retry.classify(response.status, self.retry_count) {
            RetryAction::RetryNow => self.note_retry(response.status),
            RetryAction::RetryAfter(delay) => {
                self.note_retry(response.status);
                tokio::time::sleep(delay).await;
            }
            RetryAction::GiveUp => return Err(UploadError::RetryLimitExceeded),
            RetryAction::Proceed => {
                if response.status != STATUS_RESUME_INCOMPLETE && !response.is_success() {
                    return Err(UploadError::Failed {
                        status: response.status,
                    });
                }
                // A missing or malformed Range bound, like a plain 2xx,
                // means nothing is persisted for this uri.
                let confirmed = if response.status == STATUS_RESUME_INCOMPLETE {
                    response
                        .header(HEADER_RANGE)
                        .and_then(parse_range_end)
                        .map(|end| end + 1)
                        .unwrap_or(0)
                } else {
                    0
                };
                self.confirm_offset(confirmed);
                self.state = State::Resuming;
            }
        }
        Ok(())
    }

    fn resume(&mut self) {
        info!(key = %self.key, offset = self.offset, "resuming upload");
        self.state = State::Uploading;
    }

    fn restart(&mut self) -> Result<(), UploadError> {
        info!(key = %self.key, "first chunk differs from stored session; restarting");
        self.store.delete(&self.key)?;
        self.session_uri = None;
        self.fingerprint = None;
        self.offset = 0;
        // The retry budget carries across the restart.
        self.state = State::Initiating;
        Ok(())
    }

    /// Runs one chunk upload attempt. Returns the total object size on
    /// terminal success, `None` when the state machine should keep going.
    async fn upload(&mut self) -> Result<Option<u64>, UploadError> {
        let uri = self.session_uri()?.to_string();
        let start = self.io.pending_start();
        let mut filter = ChunkOffsetFilter::new(start, self.offset, self.fingerprint.clone());

        // Fingerprint handling happens before the request is opened, but
        // only when this attempt begins at the stream origin.
        if start == 0 {
            if let Some(first) = self.io.peek_first().await {
                match filter.check_first(&first) {
                    FirstChunk::Captured(fp) => {
                        self.fingerprint = Some(fp.clone());
                        self.store.set(
                            &self.key,
                            &ResumeRecord {
                                session_uri: uri.clone(),
                                fingerprint: Some(fp),
                            },
                        )?;
                    }
                    FirstChunk::Match => {}
                    FirstChunk::Mismatch => {
                        self.state = State::Restarting;
                        return Ok(None);
                    }
                }
            }
        }

        let request = self
            .authorizer
            .authorize(chunk_upload_request(&uri, self.offset))
            .await?;
        let (body_tx, body_rx) = mpsc::channel(self.config.buffer_chunks);
        let stop = CancellationToken::new();
        let transport = self.transport.clone();

        debug!(key = %self.key, offset = self.offset, "opening chunk upload");
        let response = {
            let send = transport.send_streaming(request, receiver_stream(body_rx));
            let feed = feed_body(&mut self.io, &mut filter, body_tx, stop.clone());
            let mut send = std::pin::pin!(send);
            let mut feed = std::pin::pin!(feed);
            let mut feeding = true;
            loop {
                tokio::select! {
                    response = &mut send => break response,
                    _ = &mut feed, if feeding => feeding = false,
                }
            }
        };
        stop.cancel();
        let response = response?;
        self.emit(UploadEvent::Response(response.clone()));

        match self.config.retry.classify(response.status, self.retry_count) {
            RetryAction::RetryNow => {
                // The session resource briefly vanished from the service's
                // view; retry at the same offset without re-querying.
                self.note_retry(response.status);
            }
            RetryAction::RetryAfter(delay) => {
                self.note_retry(response.status);
                tokio::time::sleep(delay).await;
                // The server may have persisted part of the failed request;
                // re-confirm before sending anything else.
                self.state = State::OffsetQuery;
            }
            RetryAction::GiveUp => return Err(UploadError::RetryLimitExceeded),
            RetryAction::Proceed => {
                if response.is_success() {
                    let total = filter.bytes_written();
                    self.confirm_offset(total);
                    self.store.delete(&self.key)?;
                    info!(key = %self.key, total, "upload complete");
                    return Ok(Some(total));
                }
                // Anything else on the chunk upload is terminal, 308
                // included; only the offset query treats it as progress.
                return Err(UploadError::Failed {
                    status: response.status,
                });
            }
        }
        Ok(None)
    }

    async fn send_buffered(&mut self, request: Request) -> Result<Response, UploadError> {
        let request = self.authorizer.authorize(request).await?;
        let response = self.transport.send(request).await?;
        self.emit(UploadEvent::Response(response.clone()));
        Ok(response)
    }

    /// Folds a server-confirmed offset into the session, enforcing
    /// monotonicity, and releases buffered chunks it covers.
    fn confirm_offset(&mut self, confirmed: u64) {
        if confirmed < self.offset {
            warn!(
                key = %self.key,
                confirmed,
                offset = self.offset,
                "server reported a lower offset than already confirmed; keeping ours"
            );
        } else {
            self.offset = confirmed;
        }
        self.io.trim_confirmed(self.offset);
        self.emit(UploadEvent::OffsetConfirmed {
            offset: self.offset,
        });
    }

    fn note_retry(&mut self, status: u16) {
        self.retry_count += 1;
        warn!(
            key = %self.key,
            status,
            retry = self.retry_count,
            "retryable failure"
        );
    }

    fn session_uri(&self) -> Result<&str, UploadError> {
        self.session_uri
            .as_deref()
            .ok_or(UploadError::MissingSessionUri)
    }

    fn emit(&self, event: UploadEvent) {
        // Best-effort; a full event queue never stalls the upload.
        let _ = self.events.try_send(event);
    }
}
