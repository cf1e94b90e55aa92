//! The event loop that drives a [`Session`].

use reqrepl_common::Result;

use crate::event::{Event, EventReceiver};
use crate::session::Session;

/// Operator-facing side of the controller.
pub trait Console {
    /// Sets the prompt shown for the next line of input.
    fn set_prompt(&self, prompt: &str);

    /// Reports a prompt change caused by something other than operator
    /// input (a request arriving, a response finishing, a task settling).
    fn announce(&self, prompt: &str);
}

/// Owns the session and applies events to it in arrival order.
pub struct Controller<C> {
    session: Session,
    console: C,
    events: EventReceiver,
    prompt: String,
}

impl<C: Console> Controller<C> {
    pub fn new(session: Session, console: C, events: EventReceiver) -> Self {
        let prompt = session.prompt();
        Self {
            session,
            console,
            events,
            prompt,
        }
    }

    /// Processes events until `Event::Exit` arrives or the channel closes.
    pub async fn run(mut self) -> Result<()> {
        self.console.set_prompt(&self.prompt);

        while let Some(event) = self.events.recv().await {
            match event {
                Event::Arrived(exchange) => {
                    tracing::info!(
                        "Received {} {} {}",
                        exchange.id,
                        exchange.request.method(),
                        exchange.request.url()
                    );
                    self.session.accept(exchange);
                    self.refresh(true);
                }
                Event::Input { source, reply } => {
                    let evaluation = self.session.evaluate(&source);
                    self.refresh(false);
                    if let Some(reply) = reply {
                        if reply.send(evaluation).is_err() {
                            tracing::debug!("Shell stopped waiting for an evaluation");
                        }
                    }
                }
                Event::Finished(id) => {
                    if self.session.finish(id) {
                        self.refresh(true);
                    }
                }
                Event::Settled(outcome) => {
                    self.session.settle(outcome);
                    self.refresh(true);
                }
                Event::Exit => {
                    tracing::debug!("Exit requested");
                    break;
                }
            }
        }

        if let Some(current) = self.session.current() {
            tracing::info!(
                "Leaving {} unanswered with {} more queued",
                current.id,
                self.session.queued()
            );
        }
        Ok(())
    }

    fn refresh(&mut self, announce: bool) {
        let prompt = self.session.prompt();
        if prompt == self.prompt {
            return;
        }
        self.console.set_prompt(&prompt);
        if announce {
            self.console.announce(&prompt);
        }
        self.prompt = prompt;
    }
}
