use reqrepl_common::{RequestHandle, ResponseHandle};
use std::fmt;

/// Identifier assigned to an exchange when its request arrives.
///
/// Ids grow monotonically, so they double as the arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(pub u64);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A received request paired with its not-yet-sent response.
#[derive(Debug)]
pub struct PendingExchange {
    pub id: ExchangeId,
    pub request: RequestHandle,
    pub response: ResponseHandle,
}

impl PendingExchange {
    pub fn new(id: ExchangeId, request: RequestHandle, response: ResponseHandle) -> Self {
        Self { id, request, response }
    }
}
