//! Resumable upload engine.
//!
//! Streams content of unknown length to an object-storage service over its
//! resumable upload protocol and survives interruptions: transient server
//! failures, a vanished session resource, process restarts, and content
//! that changed between attempts.
//!
//! The engine is transport-agnostic. Consumers hand it a [`Transport`], an
//! [`Authorizer`], and a [`SessionStore`](upwell_store::SessionStore), then
//! drive uploads through [`Uploader::start`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use bytes::Bytes;
//! # use upwell_engine::{Uploader, UploadError, transport::{Transport, AnonymousAuthorizer}};
//! # use upwell_protocol::UploadTarget;
//! # use upwell_store::MemoryStore;
//! # async fn demo(transport: Arc<dyn Transport>) -> Result<(), UploadError> {
//! let uploader = Uploader::new(transport, Arc::new(AnonymousAuthorizer), Arc::new(MemoryStore::new()));
//! let (sink, handle) = uploader.start(UploadTarget::new("bucket", "object.bin"))?;
//! sink.write(Bytes::from_static(b"content")).await?;
//! drop(sink);
//! let total = handle.join().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod filter;
mod pipeline;
mod retry;
mod session;
pub mod transport;

pub use error::UploadError;
pub use filter::{ChunkOffsetFilter, FirstChunk};
pub use pipeline::{UploadEvent, UploadHandle, UploadSink};
pub use retry::{RETRY_LIMIT, RetryAction, RetryPolicy};
pub use session::{DEFAULT_BASE_URL, UploadConfig, Uploader};
pub use transport::{AnonymousAuthorizer, Authorizer, ByteStream, Transport};
