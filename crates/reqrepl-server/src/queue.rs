//! FIFO buffer of exchanges waiting for the operator.

use std::collections::VecDeque;

use crate::exchange::PendingExchange;
use crate::slot::CurrentSlot;

/// Ordered buffer of pending exchanges.
///
/// Exchanges leave the queue only through [`promote_if_idle`](Self::promote_if_idle),
/// oldest first. There is no way to drop or reorder a queued exchange.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<PendingExchange>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an exchange to the tail.
    pub fn enqueue(&mut self, exchange: PendingExchange) {
        self.pending.push_back(exchange);
    }

    /// Removes and returns the head, but only while `slot` is empty.
    pub fn promote_if_idle(&mut self, slot: &CurrentSlot) -> Option<PendingExchange> {
        if slot.is_occupied() {
            return None;
        }
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
