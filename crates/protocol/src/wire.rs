//! Request/response descriptors and builders for the three wire operations.

use std::collections::HashMap;

use crate::types::UploadTarget;

/// `Location` response header carrying the session uri after initiation.
pub const HEADER_LOCATION: &str = "location";
/// `Range` response header on a resume-incomplete offset query.
pub const HEADER_RANGE: &str = "range";
/// `Content-Range` request header.
pub const HEADER_CONTENT_RANGE: &str = "Content-Range";
/// `Content-Length` request header.
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
/// Declares the eventual object content type during initiation.
pub const HEADER_UPLOAD_CONTENT_TYPE: &str = "X-Upload-Content-Type";

/// Status returned by the service for an incomplete resumable session.
pub const STATUS_RESUME_INCOMPLETE: u16 = 308;

/// HTTP methods used by the resumable protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// A request descriptor handed to the transport.
///
/// Query pairs are kept unencoded; the transport applies percent-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// JSON body for buffered calls. Streaming bodies are supplied separately.
    pub json_body: Option<serde_json::Value>,
}

impl Request {
    fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json_body: None,
        }
    }

    /// Appends a header pair.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A buffered response from the transport.
///
/// Header names are lowercased by the transport so lookups are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    /// Returns the header value for a (lowercase) name, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best-effort JSON view of the body; `None` when it does not parse.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Builds the session initiation request.
///
/// `POST {base}/b/{bucket}/o?name={object}&uploadType=resumable`
/// with the object metadata as the JSON body.
pub fn initiate_request(base_url: &str, target: &UploadTarget) -> Request {
    let mut req = Request::new(
        Method::Post,
        format!("{}/b/{}/o", base_url.trim_end_matches('/'), target.bucket),
    );
    req.query.push(("name".into(), target.object.clone()));
    req.query.push(("uploadType".into(), "resumable".into()));
    if let Some(generation) = target.if_generation_match {
        req.query
            .push(("ifGenerationMatch".into(), generation.to_string()));
    }
    if let Some(content_type) = &target.metadata.content_type {
        req = req.header(HEADER_UPLOAD_CONTENT_TYPE, content_type.clone());
    }
    req.json_body = Some(serde_json::json!(target.metadata));
    req
}

/// Builds the zero-length offset probe against an existing session uri.
pub fn offset_query_request(session_uri: &str) -> Request {
    Request::new(Method::Put, session_uri)
        .header(HEADER_CONTENT_LENGTH, "0")
        .header(HEADER_CONTENT_RANGE, "bytes */*")
}

/// Builds the streaming chunk upload request starting at `offset`.
///
/// Total length is unknown to the engine, so the range is open-ended.
pub fn chunk_upload_request(session_uri: &str, offset: u64) -> Request {
    Request::new(Method::Put, session_uri)
        .header(HEADER_CONTENT_RANGE, upload_content_range(offset))
}

/// Formats the open-ended `Content-Range` value for a chunk upload.
pub fn upload_content_range(offset: u64) -> String {
    format!("bytes {offset}-*/*")
}

/// Parses the upper bound `N` out of a `Range: bytes=0-N` header value.
///
/// Returns `None` for a missing or malformed upper bound, which callers treat
/// as "nothing persisted yet".
pub fn parse_range_end(value: &str) -> Option<u64> {
    let (_, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    end.parse().ok()
}
