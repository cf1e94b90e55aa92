//! Events consumed by the controller loop.
//!
//! Everything that can change the session (a request arriving, the operator
//! submitting a line, a response finishing, a background task settling) is
//! an [`Event`] on one channel, so the session sees them strictly in order.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::exchange::{ExchangeId, PendingExchange};
use crate::runtime::TaskOutcome;

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

pub enum Event {
    /// A request was received and is ready to be queued.
    Arrived(PendingExchange),
    /// The operator submitted a line to evaluate.
    Input {
        source: String,
        reply: Option<oneshot::Sender<Evaluation>>,
    },
    /// The response of an exchange has been fully handed to the client.
    Finished(ExchangeId),
    /// A helper started by script code (file read, HTTP fetch, timer) settled.
    Settled(TaskOutcome),
    /// The shell is closing.
    Exit,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Arrived(exchange) => f.debug_tuple("Arrived").field(&exchange.id).finish(),
            Event::Input { source, .. } => f.debug_struct("Input").field("source", source).finish(),
            Event::Finished(id) => f.debug_tuple("Finished").field(id).finish(),
            Event::Settled(outcome) => f.debug_tuple("Settled").field(outcome).finish(),
            Event::Exit => f.write_str("Exit"),
        }
    }
}

/// Rendered result of one evaluation, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Value(String),
    Thrown(String),
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluation::Value(text) => f.write_str(text),
            Evaluation::Thrown(text) => write!(f, "Uncaught {}", text),
        }
    }
}
