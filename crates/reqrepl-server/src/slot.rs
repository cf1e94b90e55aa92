//! The single "current" exchange.

use thiserror::Error;

use crate::exchange::{ExchangeId, PendingExchange};

/// Prompt shown when no request is waiting for an answer.
pub const IDLE_PROMPT: &str = "> ";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotError {
    #[error("exchange {current} is already current, refusing {rejected}")]
    Occupied { current: ExchangeId, rejected: ExchangeId },
}

/// Holds at most one exchange being answered.
#[derive(Debug, Default)]
pub struct CurrentSlot {
    current: Option<PendingExchange>,
}

impl CurrentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `exchange` current.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::Occupied` if an exchange is already current. The
    /// rejected exchange is dropped, which makes its client see a 503, so
    /// callers check [`is_occupied`](Self::is_occupied) first.
    pub fn set_current(&mut self, exchange: PendingExchange) -> Result<(), SlotError> {
        if let Some(current) = &self.current {
            return Err(SlotError::Occupied {
                current: current.id,
                rejected: exchange.id,
            });
        }
        self.current = Some(exchange);
        Ok(())
    }

    /// Empties the slot if it holds exchange `id`.
    ///
    /// Clearing an empty slot, or clearing with the id of an exchange that is
    /// not current, does nothing and returns `None`.
    pub fn clear_current(&mut self, id: ExchangeId) -> Option<PendingExchange> {
        match &self.current {
            Some(current) if current.id == id => self.current.take(),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<&PendingExchange> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut PendingExchange> {
        self.current.as_mut()
    }

    pub fn current_id(&self) -> Option<ExchangeId> {
        self.current.as_ref().map(|e| e.id)
    }

    pub fn is_occupied(&self) -> bool {
        self.current.is_some()
    }

    /// Prompt for the shell: `"<METHOD> <URL>[ (<queued>)] > "`, or `"> "` when idle.
    pub fn status_line(&self, queued: usize) -> String {
        match &self.current {
            Some(exchange) => {
                let mut line = format!("{} {}", exchange.request.method(), exchange.request.url());
                if queued > 0 {
                    line.push_str(&format!(" ({})", queued));
                }
                line.push_str(" > ");
                line
            }
            None => IDLE_PROMPT.to_owned(),
        }
    }
}
