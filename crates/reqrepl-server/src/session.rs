//! The request-mediation session.
//!
//! A [`Session`] owns the queue, the current slot and the script runtime.
//! It is driven by the controller one event at a time; every method runs to
//! completion before the next event is looked at.

use boa_engine::value::JsValue;
use reqrepl_common::Result;

use crate::dispatcher::{self, classify, classify_resolved};
use crate::event::{Evaluation, Event, EventSender};
use crate::exchange::{ExchangeId, PendingExchange};
use crate::queue::RequestQueue;
use crate::runtime::{Command, Directive, ReplContext, TaskOutcome};
use crate::slot::CurrentSlot;

pub struct Session {
    queue: RequestQueue,
    slot: CurrentSlot,
    runtime: ReplContext,
    events: EventSender,
}

impl Session {
    /// Creates a session whose completion signals and background tasks
    /// report to `events`.
    pub fn new(events: EventSender) -> Result<Self> {
        Ok(Self {
            queue: RequestQueue::new(),
            slot: CurrentSlot::new(),
            runtime: ReplContext::new(events.clone())?,
            events,
        })
    }

    /// Queues an arrived exchange and promotes it if nothing is current.
    pub fn accept(&mut self, exchange: PendingExchange) {
        tracing::debug!(
            "Queued {} {} {}",
            exchange.id,
            exchange.request.method(),
            exchange.request.url()
        );
        self.queue.enqueue(exchange);
        self.promote();
    }

    /// Evaluates operator input and dispatches its value to the current
    /// exchange.
    ///
    /// Response commands issued while evaluating are applied before the
    /// value itself is dispatched, so `status(201); 'made'` answers with 201.
    pub fn evaluate(&mut self, source: &str) -> Evaluation {
        let value = match self.runtime.evaluate(source) {
            Ok(value) => value,
            Err(err) => {
                self.pump();
                return Evaluation::Thrown(err);
            }
        };
        let shown = self.runtime.display(&value);

        self.pump();
        self.dispatch(&value);
        self.pump();

        Evaluation::Value(shown)
    }

    /// Handles the completion signal of exchange `id`.
    ///
    /// Returns `false` for stale or duplicate signals, which change nothing.
    pub fn finish(&mut self, id: ExchangeId) -> bool {
        let Some(done) = self.slot.clear_current(id) else {
            tracing::debug!("Ignoring completion of {}, it is not current", id);
            return false;
        };

        tracing::info!(
            "Completed {} {} {} with {}",
            done.id,
            done.request.method(),
            done.request.url(),
            done.response.status()
        );
        if let Err(err) = self.runtime.conceal() {
            tracing::warn!("{}", err);
        }
        self.promote();
        true
    }

    /// Settles the promise of a finished background task.
    pub fn settle(&mut self, outcome: TaskOutcome) {
        self.runtime.settle(outcome);
        self.pump();
    }

    pub fn prompt(&self) -> String {
        self.slot.status_line(self.queue.len())
    }

    pub fn current(&self) -> Option<&PendingExchange> {
        self.slot.current()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn promote(&mut self) {
        let Some(mut exchange) = self.queue.promote_if_idle(&self.slot) else {
            return;
        };

        let events = self.events.clone();
        let id = exchange.id;
        exchange.response.on_finish(move || {
            if events.send(Event::Finished(id)).is_err() {
                tracing::debug!("Completion of {} after the session closed", id);
            }
        });

        if let Err(err) = self.runtime.expose(&exchange) {
            tracing::warn!("Could not expose {} to the script context: {}", id, err);
        }
        tracing::info!(
            "Now answering {} {} {}",
            id,
            exchange.request.method(),
            exchange.request.url()
        );
        if let Err(err) = self.slot.set_current(exchange) {
            tracing::error!("{}", err);
        }
    }

    fn dispatch(&mut self, value: &JsValue) {
        if !self.slot.is_occupied() {
            return;
        }
        let disposition = classify(value, &mut self.runtime);
        if let Some(exchange) = self.slot.current_mut() {
            dispatcher::dispatch(disposition, exchange, &mut self.runtime);
        }
    }

    /// Runs microtasks, applies recorded response commands and resolves
    /// deferred results until nothing changes.
    fn pump(&mut self) {
        loop {
            let mut progressed = self.runtime.run_jobs() > 0;

            for directive in self.runtime.take_directives() {
                progressed = true;
                self.apply(directive);
            }

            for (exchange, value) in self.runtime.take_settled() {
                progressed = true;
                self.resolve_deferred(exchange, &value);
            }

            if !progressed {
                break;
            }
        }
    }

    fn apply(&mut self, directive: Directive) {
        let Directive { exchange: target, command } = directive;
        let http = self.runtime.http_client();

        let Some(exchange) = self.slot.current_mut().filter(|e| e.id == target) else {
            tracing::warn!("Dropping response command for {}, it is no longer current", target);
            return;
        };

        let response = &mut exchange.response;
        let result = match command {
            Command::SetStatus(code) => response.set_status(code),
            Command::SendStatus(code) => response.send_status(code),
            Command::Header(name, value) => response.set_header(&name, &value),
            Command::Send(payload) => response.send(payload),
            Command::Pipe(source) => response.pipe(source.into_stream(&http)),
            Command::End => response.end(),
        };

        if let Err(err) = result {
            tracing::warn!("Response command for {} failed: {}", target, err);
        }
    }

    fn resolve_deferred(&mut self, target: ExchangeId, value: &JsValue) {
        if self.slot.current_id() != Some(target) {
            tracing::debug!("Dropping deferred result for {}, it is no longer current", target);
            return;
        }

        let Some(payload) = classify_resolved(value, &mut self.runtime) else {
            tracing::debug!("Deferred result for {} is not sendable", target);
            return;
        };

        if let Some(exchange) = self.slot.current_mut() {
            if let Err(err) = exchange.response.send(payload) {
                tracing::warn!("Could not answer {}: {}", target, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventReceiver;
    use crate::test_support::{body_text, exchange};
    use hyper::header::CONTENT_TYPE;
    use tokio::sync::mpsc;

    fn session() -> (Session, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Session::new(events).unwrap(), receiver)
    }

    /// Feeds queued completion and task events back into the session until
    /// one completion has been handled.
    async fn handle_until_finished(session: &mut Session, events: &mut EventReceiver) {
        loop {
            match events.recv().await {
                Some(Event::Finished(id)) => {
                    session.finish(id);
                    return;
                }
                Some(Event::Settled(outcome)) => session.settle(outcome),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    async fn handle_settled(session: &mut Session, events: &mut EventReceiver) {
        match events.recv().await {
            Some(Event::Settled(outcome)) => session.settle(outcome),
            other => panic!("expected a settled task, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_arrivals_are_promoted_one_at_a_time_in_order() {
        let (mut session, mut events) = session();
        let mut replies = Vec::new();
        for n in 1..=3 {
            let (pending, reply) = exchange(n, "GET", &format!("/{n}"));
            session.accept(pending);
            replies.push(reply);
        }

        assert_eq!(session.prompt(), "GET /1 (2) > ");
        for (n, reply) in (1..=3u64).zip(replies) {
            assert_eq!(session.current().map(|e| e.id), Some(ExchangeId(n)));
            session.evaluate("200");

            let response = reply.await.unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(body_text(response).await, "OK");
            handle_until_finished(&mut session, &mut events).await;
        }

        assert!(session.current().is_none());
        assert_eq!(session.prompt(), "> ");
    }

    #[tokio::test]
    async fn test_status_evaluation_promotes_the_next_request() {
        let (mut session, mut events) = session();
        let (first, first_reply) = exchange(1, "GET", "/a");
        let (second, _second_reply) = exchange(2, "DELETE", "/b");
        session.accept(first);
        session.accept(second);

        assert_eq!(session.evaluate("200"), Evaluation::Value("200".into()));
        let response = first_reply.await.unwrap();
        assert_eq!(response.status(), 200);
        drop(response);

        handle_until_finished(&mut session, &mut events).await;
        assert_eq!(session.prompt(), "DELETE /b > ");
        assert_eq!(session.evaluate("method"), Evaluation::Value("\"DELETE\"".into()));
    }

    #[tokio::test]
    async fn test_inspecting_aliases_sends_nothing() {
        let (mut session, _events) = session();
        let (pending, mut reply) = exchange(1, "GET", "/peek");
        session.accept(pending);

        session.evaluate("method");
        session.evaluate("url");
        session.evaluate("headers");
        assert!(reply.try_recv().is_err(), "no response should have been sent");
        assert!(session.current().is_some());
    }

    #[tokio::test]
    async fn test_object_literal_is_sent_as_json() {
        let (mut session, _events) = session();
        let (pending, reply) = exchange(1, "GET", "/json");
        session.accept(pending);

        session.evaluate("{a:1}");
        let response = reply.await.unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json; charset=utf-8");
        assert_eq!(body_text(response).await, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_status_helper_applies_before_dispatch() {
        let (mut session, _events) = session();
        let (pending, reply) = exchange(1, "POST", "/items");
        session.accept(pending);

        session.evaluate("status(201); header('Location', '/items/1'); 'made'");
        let response = reply.await.unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.headers()["location"], "/items/1");
        assert_eq!(body_text(response).await, "made");
    }

    #[tokio::test]
    async fn test_deferred_value_is_sent_after_resolution() {
        let (mut session, mut events) = session();
        let (pending, mut reply) = exchange(1, "GET", "/slow");
        session.accept(pending);

        session.evaluate("delay(10, 'eventually')");
        assert!(reply.try_recv().is_err(), "nothing is sent before resolution");

        handle_settled(&mut session, &mut events).await;
        let response = reply.await.unwrap();
        assert_eq!(body_text(response).await, "eventually");
    }

    #[tokio::test]
    async fn test_deferred_value_for_a_finished_exchange_is_dropped() {
        let (mut session, mut events) = session();
        let (first, first_reply) = exchange(1, "GET", "/first");
        let (second, mut second_reply) = exchange(2, "GET", "/second");
        session.accept(first);
        session.accept(second);

        session.evaluate("delay(20, 'too late')");
        session.evaluate("res.send('now')");
        assert_eq!(body_text(first_reply.await.unwrap()).await, "now");

        handle_until_finished(&mut session, &mut events).await;
        assert_eq!(session.current().map(|e| e.id), Some(ExchangeId(2)));

        handle_settled(&mut session, &mut events).await;
        assert!(second_reply.try_recv().is_err(), "stale continuation must not answer /second");
    }

    #[tokio::test]
    async fn test_rejected_deferred_value_is_dropped() {
        let (mut session, _events) = session();
        let (pending, mut reply) = exchange(1, "GET", "/");
        session.accept(pending);

        session.evaluate("Promise.reject(new Error('nope'))");
        assert!(reply.try_recv().is_err());
        assert!(session.current().is_some());
    }

    #[tokio::test]
    async fn test_errors_do_not_dispatch() {
        let (mut session, _events) = session();
        session.evaluate("'previous'");

        let (pending, mut reply) = exchange(1, "GET", "/");
        session.accept(pending);
        let evaluation = session.evaluate("undefinedThing.x");
        assert!(matches!(evaluation, Evaluation::Thrown(ref e) if e.starts_with("ReferenceError")));
        assert!(evaluation.to_string().starts_with("Uncaught ReferenceError"));
        assert!(reply.try_recv().is_err(), "an error must not send the previous result");
    }

    #[tokio::test]
    async fn test_clearing_an_empty_slot_is_harmless() {
        let (mut session, mut events) = session();
        assert!(!session.finish(ExchangeId(42)));
        assert_eq!(session.prompt(), "> ");

        let (pending, reply) = exchange(1, "GET", "/after");
        session.accept(pending);
        assert!(!session.finish(ExchangeId(42)), "stale id must not clear the slot");
        assert_eq!(session.prompt(), "GET /after > ");

        session.evaluate("204");
        drop(reply.await.unwrap());
        handle_until_finished(&mut session, &mut events).await;
        assert!(!session.finish(ExchangeId(1)), "duplicate completion is ignored");
        assert_eq!(session.prompt(), "> ");
    }

    #[tokio::test]
    async fn test_second_answer_is_rejected_without_breaking_the_session() {
        let (mut session, _events) = session();
        let (pending, reply) = exchange(1, "GET", "/");
        session.accept(pending);

        session.evaluate("'first'");
        session.evaluate("'second'");
        assert_eq!(body_text(reply.await.unwrap()).await, "first");
        assert_eq!(session.evaluate("1 + 1"), Evaluation::Value("2".into()));
    }

    #[tokio::test]
    async fn test_pipe_streams_file_into_response() {
        let (mut session, _events) = session();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"<p>streamed</p>").unwrap();
        let path = serde_json::to_string(&file.path().to_string_lossy()).unwrap();

        let (pending, reply) = exchange(1, "GET", "/page");
        session.accept(pending);
        session.evaluate(&format!("fs.createReadStream({path})"));

        assert_eq!(body_text(reply.await.unwrap()).await, "<p>streamed</p>");
    }

    #[tokio::test]
    async fn test_evaluation_without_request_only_evaluates() {
        let (mut session, _events) = session();
        assert_eq!(session.evaluate("200"), Evaluation::Value("200".into()));
        assert_eq!(session.queued(), 0);
        assert!(session.current().is_none());
    }
}
