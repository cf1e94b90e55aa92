//! reqrepl Server
//!
//! This crate holds requests in arrival order and lets an operator answer
//! the oldest one from a JavaScript session running on the Boa engine.
//!
//! # Overview
//!
//! - [`HttpServer`] accepts connections and posts each request as an
//!   [`Event`]
//! - [`Controller`] owns the [`Session`] and applies events one at a time
//! - [`Session`] combines the request queue, the current slot and the
//!   script runtime, and dispatches evaluation results as responses

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod event;
pub mod exchange;
pub mod http_server;
pub mod queue;
pub mod runtime;
pub mod session;
pub mod slot;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use controller::{Console, Controller};
pub use event::{Evaluation, Event, EventReceiver, EventSender};
pub use exchange::{ExchangeId, PendingExchange};
pub use http_server::HttpServer;
pub use session::Session;
