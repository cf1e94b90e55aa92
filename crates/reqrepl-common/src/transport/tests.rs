//! Tests for the response handle.
//!
//! These check the write-once contract, content-type inference, the
//! completion callback and the request version label.

#[cfg(test)]
mod tests {
    use crate::error::ReqreplError;
    use crate::transport::{Payload, RequestHandle, ResponseHandle};
    use hyper::header::HeaderMap;
    use hyper::{Method, Version};
    use futures::stream;
    use http_body_util::BodyExt;
    use hyper::body::Bytes;
    use hyper::header::CONTENT_TYPE;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn body_text(response: crate::HyperResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_request_version_label() {
        let request = |version| RequestHandle::new(Method::GET, "/", version, HeaderMap::new(), Bytes::new());
        assert_eq!(request(Version::HTTP_10).version_label(), "1.0");
        assert_eq!(request(Version::HTTP_11).version_label(), "1.1");
        assert_eq!(request(Version::HTTP_2).version_label(), "2.0");
    }

    #[tokio::test]
    async fn test_send_status_uses_reason_phrase() {
        let (mut handle, reply) = ResponseHandle::channel();
        handle.send_status(404).unwrap();

        let response = reply.await.unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(body_text(response).await, "Not Found");
    }

    #[tokio::test]
    async fn test_send_json_infers_content_type() {
        let (mut handle, reply) = ResponseHandle::channel();
        handle.send(Payload::Json(json!({"a": 1}))).unwrap();

        let response = reply.await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json; charset=utf-8");
        assert_eq!(body_text(response).await, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_explicit_header_wins_over_inference() {
        let (mut handle, reply) = ResponseHandle::channel();
        handle.set_header("Content-Type", "text/plain").unwrap();
        handle.set_status(201).unwrap();
        handle.send(Payload::Text("made".into())).unwrap();

        let response = reply.await.unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_second_send_is_rejected() {
        let (mut handle, _reply) = ResponseHandle::channel();
        handle.send(Payload::Empty).unwrap();

        assert!(handle.is_sent());
        assert!(matches!(handle.send_status(200), Err(ReqreplError::AlreadySent)));
        assert!(matches!(handle.set_header("x-late", "1"), Err(ReqreplError::AlreadySent)));
    }

    #[test]
    fn test_invalid_header_and_status() {
        let (mut handle, _reply) = ResponseHandle::channel();
        assert!(matches!(handle.set_header("bad header", "v"), Err(ReqreplError::InvalidHeader(_))));
        assert!(matches!(handle.set_header("x-ok", "line\nbreak"), Err(ReqreplError::InvalidHeader(_))));
        assert!(matches!(handle.set_status(42), Err(ReqreplError::InvalidStatus(42))));
        assert!(!handle.is_sent());
    }

    #[tokio::test]
    async fn test_finish_fires_once_after_body_is_consumed() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let (mut handle, reply) = ResponseHandle::channel();
        handle.on_finish(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.send(Payload::Text("bye".into())).unwrap();

        let response = reply.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0, "completion must wait for the body");

        assert_eq!(body_text(response).await, "bye");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finish_fires_when_client_is_gone() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let (mut handle, reply) = ResponseHandle::channel();
        handle.on_finish(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(reply);

        handle.send_status(200).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pipe_streams_chunks() {
        let (mut handle, reply) = ResponseHandle::channel();
        let chunks = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"chunk-1;")),
            Ok(Bytes::from_static(b"chunk-2")),
        ]);
        handle.pipe(Box::pin(chunks)).unwrap();

        let response = reply.await.unwrap();
        assert_eq!(body_text(response).await, "chunk-1;chunk-2");
    }
}
