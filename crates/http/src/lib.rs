//! reqwest-backed [`Transport`] and authorizers for the upload engine.

use std::collections::HashMap;
use std::convert::Infallible;

use bytes::Bytes;
use futures_util::StreamExt;
use upwell_engine::transport::{Authorizer, BoxFuture, ByteStream, Transport};
use upwell_engine::UploadError;
use upwell_protocol::{Method, Request, Response};

/// Transport backed by a shared [`reqwest::Client`].
///
/// Connection pooling, TLS, and percent-encoding of query pairs all come
/// from the client; connection-level failures surface as
/// [`UploadError::Transport`].
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Wraps an existing client, keeping its pool and middleware settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn builder(&self, request: &Request) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Post => self.client.post(&request.uri),
            Method::Put => self.client.put(&request.uri),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }
        builder
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect(response: reqwest::Response) -> Result<Response, UploadError> {
    let status = response.status().as_u16();
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }
    let body = response
        .bytes()
        .await
        .map_err(|err| UploadError::Transport(err.to_string()))?
        .to_vec();
    Ok(Response {
        status,
        headers,
        body,
    })
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> BoxFuture<'_, Result<Response, UploadError>> {
        Box::pin(async move {
            let response = self
                .builder(&request)
                .send()
                .await
                .map_err(|err| UploadError::Transport(err.to_string()))?;
            collect(response).await
        })
    }

    fn send_streaming(
        &self,
        request: Request,
        body: ByteStream,
    ) -> BoxFuture<'_, Result<Response, UploadError>> {
        Box::pin(async move {
            let stream = body.map(Ok::<Bytes, Infallible>);
            let response = self
                .builder(&request)
                .body(reqwest::Body::wrap_stream(stream))
                .send()
                .await
                .map_err(|err| UploadError::Transport(err.to_string()))?;
            collect(response).await
        })
    }
}

/// Adds a static bearer token to every request.
///
/// Token refresh is the embedder's concern; build a new uploader (or a
/// custom [`Authorizer`]) when the token rotates.
pub struct BearerAuthorizer {
    token: String,
}

impl BearerAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Authorizer for BearerAuthorizer {
    fn authorize(&self, request: Request) -> BoxFuture<'_, Result<Request, UploadError>> {
        let authorized = request.header("Authorization", format!("Bearer {}", self.token));
        Box::pin(async move { Ok(authorized) })
    }
}

#[cfg(test)]
mod tests {
    use upwell_protocol::{UploadTarget, initiate_request, offset_query_request};

    use super::*;

    #[tokio::test]
    async fn bearer_authorizer_adds_the_header() {
        let request = offset_query_request("https://upload.example/session/abc");
        let authorized = BearerAuthorizer::new("tok-123")
            .authorize(request)
            .await
            .unwrap();
        assert!(
            authorized
                .headers
                .contains(&("Authorization".into(), "Bearer tok-123".into()))
        );
    }

    #[test]
    fn initiation_request_maps_to_a_post_with_query_and_json() {
        let mut target = UploadTarget::new("bkt", "dir/obj.bin");
        target.metadata.content_type = Some("application/octet-stream".into());

        let transport = HttpTransport::new();
        let built = transport
            .builder(&initiate_request("https://upload.example/v1", &target))
            .build()
            .unwrap();

        assert_eq!(built.method(), reqwest::Method::POST);
        let url = built.url();
        assert_eq!(url.path(), "/v1/b/bkt/o");
        // The object name is percent-encoded by the client.
        assert!(url.query().unwrap().contains("name=dir%2Fobj.bin"));
        assert!(url.query().unwrap().contains("uploadType=resumable"));
        assert_eq!(
            built.headers().get("X-Upload-Content-Type").unwrap(),
            "application/octet-stream"
        );
        let body: serde_json::Value =
            serde_json::from_slice(built.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["contentType"], "application/octet-stream");
    }

    #[test]
    fn offset_query_maps_to_a_zero_length_put() {
        let transport = HttpTransport::new();
        let built = transport
            .builder(&offset_query_request("https://upload.example/session/abc"))
            .build()
            .unwrap();

        assert_eq!(built.method(), reqwest::Method::PUT);
        assert_eq!(built.headers().get("Content-Range").unwrap(), "bytes */*");
        assert_eq!(built.headers().get("Content-Length").unwrap(), "0");
        assert!(built.body().is_none());
    }
}
