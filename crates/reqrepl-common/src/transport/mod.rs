//! reqrepl Transport Layer
//!
//! This module holds the HTTP-facing halves of an exchange.
//!
//! # Components
//!
//! - **[`RequestHandle`]**: read-only view of a received request (method,
//!   URL, version, headers and the collected body)
//! - **[`ResponseHandle`]**: write-once response sink with a completion
//!   callback that fires when hyper has finished with the response body
//! - **[`Payload`]**: body values with content-type inference

pub mod http;

pub use http::{ByteStream, HyperRequest, HyperResponse, Payload, RequestHandle, ResponseBody, ResponseHandle};

#[cfg(test)]
mod tests;
