//! HTTP Transport Handles
//!
//! This module provides the two halves of an HTTP exchange as seen by the
//! request mediator.
//!
//! # Architecture
//!
//! The listener collects each inbound request into a [`RequestHandle`] and
//! pairs it with a [`ResponseHandle`] whose other end is a oneshot receiver
//! awaited by the hyper service future. Sending through the handle hands a
//! complete `hyper::Response` to that future exactly once.
//!
//! The response body is wrapped so that dropping it (hyper drops the body
//! once the last frame is written, or when the connection goes away) runs
//! the completion callback registered with [`ResponseHandle::on_finish`].
//!
//! # Example
//!
//! ```no_run
//! use reqrepl_common::transport::http::{Payload, ResponseHandle};
//! use serde_json::json;
//!
//! let (mut response, reply) = ResponseHandle::channel();
//! response.on_finish(|| println!("delivered"));
//! response.send(Payload::Json(json!({"ok": true}))).unwrap();
//! ```

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Bytes, Frame, Incoming, SizeHint};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Version};
use tokio::sync::oneshot;

use crate::error::{ReqreplError, Result};

/// Type alias for Hyper incoming requests
pub type HyperRequest = Request<Incoming>;

/// Boxed response body used for every response the mediator produces
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// Type alias for Hyper responses
pub type HyperResponse = Response<ResponseBody>;

/// A stream of body chunks that can be piped into a response
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

type FinishCallback = Box<dyn FnOnce() + Send>;

/// Read-only view of a received request.
///
/// The body is collected before the request is queued, so every accessor
/// is synchronous.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    method: Method,
    url: String,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestHandle {
    /// Creates a request handle from its parts.
    pub fn new(method: Method, url: impl Into<String>, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            url: url.into(),
            version,
            headers,
            body,
        }
    }

    /// Collects a hyper request into a handle.
    ///
    /// # Errors
    ///
    /// Returns `ReqreplError::Transport` if reading the body fails.
    pub async fn from_hyper(req: HyperRequest) -> Result<Self> {
        let (parts, body) = req.into_parts();

        let body = body.collect().await
            .map_err(|e| ReqreplError::Transport(format!("Failed to read request body: {}", e)))?
            .to_bytes();

        let url = parts.uri.path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| parts.uri.to_string());

        Ok(Self::new(parts.method, url, parts.version, parts.headers, body))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path and query exactly as the client sent them.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Version in the `major.minor` form, e.g. `"1.1"`.
    pub fn version_label(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "0.9",
            Version::HTTP_10 => "1.0",
            Version::HTTP_2 => "2.0",
            Version::HTTP_3 => "3.0",
            _ => "1.1",
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// A response body value with content-type inference.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Text, served as `text/html` unless a content type was set
    Text(String),
    /// Raw bytes, served as `application/octet-stream`
    Bytes(Bytes),
    /// Arrays and plain objects, serialized as JSON
    Json(serde_json::Value),
    /// No body (`null`)
    Empty,
}

impl Payload {
    /// Content type used when the operator has not set one.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Payload::Text(_) => Some("text/html; charset=utf-8"),
            Payload::Bytes(_) => Some("application/octet-stream"),
            Payload::Json(_) => Some("application/json; charset=utf-8"),
            Payload::Empty => None,
        }
    }

    /// Serializes the payload into body bytes.
    ///
    /// # Errors
    ///
    /// Returns `ReqreplError::Json` if JSON serialization fails.
    pub fn into_bytes(self) -> Result<Bytes> {
        Ok(match self {
            Payload::Text(text) => Bytes::from(text),
            Payload::Bytes(bytes) => bytes,
            Payload::Json(value) => Bytes::from(serde_json::to_vec(&value)?),
            Payload::Empty => Bytes::new(),
        })
    }
}

/// Runs the completion callback when the response body is dropped.
struct FinishGuard(Option<FinishCallback>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }
}

/// Response body that carries the completion guard.
struct TrackedBody {
    inner: ResponseBody,
    _finish: FinishGuard,
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<std::result::Result<Frame<Bytes>, io::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Builds a body from a single buffer.
pub fn full_body(bytes: Bytes) -> ResponseBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// Builds a streaming (chunked) body.
pub fn stream_body(stream: ByteStream) -> ResponseBody {
    StreamBody::new(stream.map(|chunk| chunk.map(Frame::data))).boxed_unsync()
}

/// Plain-text response used when the mediator cannot take a request.
pub fn service_unavailable() -> HyperResponse {
    plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
}

/// Plain-text response for requests whose body could not be read.
pub fn bad_request() -> HyperResponse {
    plain_response(StatusCode::BAD_REQUEST, "Bad Request")
}

fn plain_response(status: StatusCode, text: &'static str) -> HyperResponse {
    let mut response = Response::new(full_body(Bytes::from_static(text.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Write-once response sink for one exchange.
///
/// Status and headers accumulate until one of [`send_status`](Self::send_status),
/// [`send`](Self::send), [`pipe`](Self::pipe) or [`end`](Self::end) delivers
/// the response. Any later attempt fails with `ReqreplError::AlreadySent`.
pub struct ResponseHandle {
    reply: Option<oneshot::Sender<HyperResponse>>,
    status: StatusCode,
    headers: HeaderMap,
    on_finish: Option<FinishCallback>,
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("sent", &self.is_sent())
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

impl ResponseHandle {
    /// Creates a handle that delivers its response to `reply`.
    pub fn new(reply: oneshot::Sender<HyperResponse>) -> Self {
        Self {
            reply: Some(reply),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            on_finish: None,
        }
    }

    /// Creates a handle together with the receiver the HTTP service awaits.
    pub fn channel() -> (Self, oneshot::Receiver<HyperResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(tx), rx)
    }

    /// Registers the completion callback.
    ///
    /// The callback runs once, when hyper releases the response body: after
    /// the last byte was written, or when the client disconnected.
    pub fn on_finish(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_finish = Some(Box::new(callback));
    }

    pub fn is_sent(&self) -> bool {
        self.reply.is_none()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status used by the next send.
    pub fn set_status(&mut self, code: u16) -> Result<()> {
        self.ensure_open()?;
        self.status = StatusCode::from_u16(code).map_err(|_| ReqreplError::InvalidStatus(code))?;
        Ok(())
    }

    /// Sets (replaces) a response header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ReqreplError::InvalidHeader(format!("'{}': {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ReqreplError::InvalidHeader(format!("'{}' value: {}", name, e)))?;
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    /// Sends a status-only response whose body is the reason phrase.
    ///
    /// Statuses that forbid a body (1xx, 204, 304) are sent empty.
    pub fn send_status(&mut self, code: u16) -> Result<()> {
        self.set_status(code)?;
        if self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            return self.finish(full_body(Bytes::new()));
        }
        let reason = self.status.canonical_reason()
            .map(str::to_owned)
            .unwrap_or_else(|| code.to_string());
        self.default_content_type("text/plain; charset=utf-8");
        self.finish(full_body(Bytes::from(reason)))
    }

    /// Sends a body with the current status and headers.
    pub fn send(&mut self, payload: Payload) -> Result<()> {
        self.ensure_open()?;
        if let Some(content_type) = payload.content_type() {
            self.default_content_type(content_type);
        }
        let bytes = payload.into_bytes()?;
        self.finish(full_body(bytes))
    }

    /// Streams `stream` into the response body.
    pub fn pipe(&mut self, stream: ByteStream) -> Result<()> {
        self.ensure_open()?;
        self.finish(stream_body(stream))
    }

    /// Sends the response with an empty body.
    pub fn end(&mut self) -> Result<()> {
        self.finish(full_body(Bytes::new()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_sent() {
            return Err(ReqreplError::AlreadySent);
        }
        Ok(())
    }

    fn default_content_type(&mut self, content_type: &'static str) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }

    fn finish(&mut self, body: ResponseBody) -> Result<()> {
        let reply = self.reply.take().ok_or(ReqreplError::AlreadySent)?;

        let body = TrackedBody {
            inner: body,
            _finish: FinishGuard(self.on_finish.take()),
        }
        .boxed_unsync();

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);

        // A failed send drops the response here, which still fires completion.
        if reply.send(response).is_err() {
            tracing::debug!("Client went away before the response was delivered");
        }
        Ok(())
    }
}
