//! Host-side state shared by the native bindings.
//!
//! Native functions cannot touch the transport directly: they run inside
//! the engine while the session is borrowed. Instead they record what they
//! want done here, and the session collects it after evaluation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use boa_engine::object::builtins::JsFunction;
use boa_engine::value::JsValue;
use reqrepl_common::Payload;
use tokio::runtime::Handle;

use crate::event::{Event, EventSender};
use crate::exchange::ExchangeId;
use crate::runtime::streams::StreamSource;

pub type SharedRegistry = Rc<RefCell<Registry>>;

/// A response operation requested from script code.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetStatus(u16),
    SendStatus(u16),
    Header(String, String),
    Send(Payload),
    Pipe(StreamSource),
    End,
}

/// A command bound to the exchange whose response it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub exchange: ExchangeId,
    pub command: Command,
}

/// What a finished background task resolves its promise with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Text(String),
    /// The value handed to the task when it was started (`delay`).
    Held,
}

/// Result of a background task, delivered through the event channel.
#[derive(Debug)]
pub struct TaskOutcome {
    pub id: u64,
    pub result: Result<Resolution, String>,
}

pub(crate) struct PendingTask {
    pub resolve: JsFunction,
    pub reject: JsFunction,
    pub held: Option<JsValue>,
}

pub struct Registry {
    events: EventSender,
    http: reqwest::Client,
    current: Option<ExchangeId>,
    directives: Vec<Directive>,
    settled: Vec<(ExchangeId, JsValue)>,
    streams: HashMap<u64, StreamSource>,
    tasks: HashMap<u64, PendingTask>,
    next_id: u64,
}

impl Registry {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            http: reqwest::Client::new(),
            current: None,
            directives: Vec::new(),
            settled: Vec::new(),
            streams: HashMap::new(),
            tasks: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn shared(events: EventSender) -> SharedRegistry {
        Rc::new(RefCell::new(Self::new(events)))
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn current(&self) -> Option<ExchangeId> {
        self.current
    }

    pub fn set_current(&mut self, exchange: Option<ExchangeId>) {
        self.current = exchange;
    }

    pub fn push(&mut self, exchange: ExchangeId, command: Command) {
        self.directives.push(Directive { exchange, command });
    }

    pub fn take_directives(&mut self) -> Vec<Directive> {
        std::mem::take(&mut self.directives)
    }

    /// Records the fulfilment value of a deferred result.
    pub fn push_settled(&mut self, exchange: ExchangeId, value: JsValue) {
        self.settled.push((exchange, value));
    }

    pub fn take_settled(&mut self) -> Vec<(ExchangeId, JsValue)> {
        std::mem::take(&mut self.settled)
    }

    pub fn register_stream(&mut self, source: StreamSource) -> u64 {
        let id = self.allocate_id();
        self.streams.insert(id, source);
        id
    }

    /// Hands out a stream source. Each source can be taken once.
    pub fn take_stream(&mut self, id: u64) -> Option<StreamSource> {
        self.streams.remove(&id)
    }

    /// Forgets every stream that was never piped; returns how many.
    pub fn discard_streams(&mut self) -> usize {
        let count = self.streams.len();
        self.streams.clear();
        count
    }

    pub fn held_streams(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn take_task(&mut self, id: u64) -> Option<PendingTask> {
        self.tasks.remove(&id)
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Registers the promise resolvers of a background task and spawns
    /// `work` on the tokio runtime.
    ///
    /// The outcome comes back as `Event::Settled`, so the promise is settled
    /// on the controller thread.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime; nothing is registered then.
    pub(crate) fn start_task<F>(&mut self, task: PendingTask, work: F) -> Result<u64, String>
    where
        F: Future<Output = Result<Resolution, String>> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|e| format!("No async runtime: {}", e))?;

        let id = self.allocate_id();
        self.tasks.insert(id, task);

        let events = self.events.clone();
        handle.spawn(async move {
            let result = work.await;
            if events.send(Event::Settled(TaskOutcome { id, result })).is_err() {
                tracing::debug!("Task {} settled after the session closed", id);
            }
        });
        Ok(id)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
