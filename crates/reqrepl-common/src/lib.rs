//! reqrepl Common Types and Transport
//!
//! This crate provides the error type and the HTTP transport handles shared
//! by the reqrepl server and CLI.
//!
//! # Overview
//!
//! reqrepl accepts HTTP requests, holds them in a queue and lets an operator
//! answer them one at a time from an interactive JavaScript shell. This crate
//! contains the pieces that do not depend on the JavaScript engine:
//!
//! - **Errors**: [`ReqreplError`] and the crate-wide [`Result`] alias
//! - **Transport**: [`RequestHandle`], [`ResponseHandle`] and [`Payload`],
//!   the read-only request view and the write-once response sink
//!
//! # Example
//!
//! ```no_run
//! use reqrepl_common::{Payload, ResponseHandle};
//!
//! let (mut response, _reply) = ResponseHandle::channel();
//! response.set_header("X-Answered-By", "operator").unwrap();
//! response.send(Payload::Text("hello".into())).unwrap();
//! ```

pub mod error;
pub mod transport;

pub use error::{ReqreplError, Result};
pub use transport::{ByteStream, HyperRequest, HyperResponse, Payload, RequestHandle, ResponseBody, ResponseHandle};
