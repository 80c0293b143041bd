//! Wire-level types for the upwell resumable upload protocol.
//!
//! This crate defines the data model shared between the upload engine and
//! its collaborators: the upload target identity, object metadata, the
//! persisted resume record, and the request/response descriptors for the
//! three wire operations (session initiation, offset query, chunk upload).
//! It has no I/O of its own.

pub mod types;
pub mod wire;

pub use types::{FINGERPRINT_LEN, Fingerprint, ObjectMetadata, ResumeRecord, UploadTarget};
pub use wire::{
    HEADER_CONTENT_LENGTH, HEADER_CONTENT_RANGE, HEADER_LOCATION, HEADER_RANGE,
    HEADER_UPLOAD_CONTENT_TYPE, Method, Request, Response, STATUS_RESUME_INCOMPLETE,
    chunk_upload_request, initiate_request, offset_query_request, parse_range_end,
    upload_content_range,
};
