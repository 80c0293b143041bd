//! Collaborator contracts consumed by the session controller.
//!
//! The engine drives an abstract HTTP-like transport and an authorizer.
//! Using traits keeps the state machine decoupled from real network I/O and
//! testable with scripted mocks.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use upwell_protocol::{Request, Response};

use crate::error::UploadError;

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Streaming request body consumed by the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Bytes> + Send + 'static>>;

/// Applies credentials to outgoing requests.
pub trait Authorizer: Send + Sync {
    /// Returns the request with authorization applied.
    ///
    /// A failure here aborts the session immediately.
    fn authorize(&self, request: Request) -> BoxFuture<'_, Result<Request, UploadError>>;
}

/// Pass-through authorizer for anonymous or pre-signed endpoints.
pub struct AnonymousAuthorizer;

impl Authorizer for AnonymousAuthorizer {
    fn authorize(&self, request: Request) -> BoxFuture<'_, Result<Request, UploadError>> {
        Box::pin(async move { Ok(request) })
    }
}

/// HTTP-like transport driven by the engine.
///
/// Implementations perform the real network I/O. The engine guarantees at
/// most one outstanding call per session, so implementations never see
/// concurrent requests for the same upload.
pub trait Transport: Send + Sync {
    /// Sends a buffered request and resolves with the buffered response.
    fn send(&self, request: Request) -> BoxFuture<'_, Result<Response, UploadError>>;

    /// Sends a request whose body is drawn from `body` until the stream
    /// ends, then resolves with the fully buffered response.
    ///
    /// Connection-level failures are fatal; they are reported as
    /// [`UploadError::Transport`] and never retried.
    fn send_streaming(
        &self,
        request: Request,
        body: ByteStream,
    ) -> BoxFuture<'_, Result<Response, UploadError>>;
}
