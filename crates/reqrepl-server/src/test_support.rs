//! Builders shared by the unit tests.

use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, Version};
use reqrepl_common::{HyperResponse, RequestHandle, ResponseHandle};
use tokio::sync::oneshot;

use crate::exchange::{ExchangeId, PendingExchange};

/// An exchange with no headers and an empty body, plus the receiver the
/// HTTP service would await.
pub(crate) fn exchange(n: u64, method: &str, url: &str) -> (PendingExchange, oneshot::Receiver<HyperResponse>) {
    exchange_with(n, method, url, &[], "")
}

pub(crate) fn exchange_with(
    n: u64,
    method: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> (PendingExchange, oneshot::Receiver<HyperResponse>) {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        header_map.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    let request = RequestHandle::new(
        Method::from_bytes(method.as_bytes()).unwrap(),
        url,
        Version::HTTP_11,
        header_map,
        Bytes::from(body.to_owned()),
    );
    let (response, reply) = ResponseHandle::channel();
    (PendingExchange::new(ExchangeId(n), request, response), reply)
}

/// Consumes a response body, which also fires the completion callback.
pub(crate) async fn body_text(response: HyperResponse) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
