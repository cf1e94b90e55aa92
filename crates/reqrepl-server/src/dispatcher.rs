//! Turns evaluation results into response actions.
//!
//! A value is classified once into a [`Disposition`], checked in this order:
//!
//! 1. `undefined` is ignored.
//! 2. An integral number in `100..=599` sends a status-only response.
//! 3. A value strictly equal to the installed `method`, `url` or `headers`
//!    binding is ignored, so inspecting the request never answers it.
//! 4. Strings, `Uint8Array`s, `null`, arrays and plain objects are sent as
//!    the body.
//! 5. Objects with a callable `pipe` are piped into the response.
//! 6. Objects with a callable `then` are deferred until they fulfil.
//! 7. Everything else is ignored.

use boa_engine::{object::JsObject, value::JsValue};
use reqrepl_common::Payload;

use crate::exchange::PendingExchange;
use crate::runtime::conversions::payload_of;
use crate::runtime::ReplContext;

/// What to do with an evaluated value.
#[derive(Debug)]
pub enum Disposition {
    Status(u16),
    Send(Payload),
    Pipe(JsObject),
    Defer(JsObject),
    Ignore,
}

pub fn classify(value: &JsValue, runtime: &mut ReplContext) -> Disposition {
    if value.is_undefined() {
        return Disposition::Ignore;
    }

    if let Some(code) = status_code(value) {
        return Disposition::Status(code);
    }

    if let Some(payload) = sendable(value, runtime) {
        return Disposition::Send(payload);
    }

    let Some(object) = value.as_object().map(|o| o.clone()) else {
        return Disposition::Ignore;
    };

    if runtime.method_of(&object, "pipe").is_some() {
        return Disposition::Pipe(object);
    }
    if runtime.method_of(&object, "then").is_some() {
        return Disposition::Defer(object);
    }

    Disposition::Ignore
}

/// Classifies the fulfilment value of a deferred result: alias exclusion
/// and sendable values only.
pub fn classify_resolved(value: &JsValue, runtime: &mut ReplContext) -> Option<Payload> {
    sendable(value, runtime)
}

fn status_code(value: &JsValue) -> Option<u16> {
    let n = value.as_number()?;
    (n.fract() == 0.0 && (100.0..=599.0).contains(&n)).then_some(n as u16)
}

fn sendable(value: &JsValue, runtime: &mut ReplContext) -> Option<Payload> {
    if runtime.is_alias(value) {
        return None;
    }
    match payload_of(value, runtime.context_mut()) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!("Value cannot be sent: {}", err);
            None
        }
    }
}

/// Carries out a disposition against the current exchange.
pub fn dispatch(disposition: Disposition, exchange: &mut PendingExchange, runtime: &mut ReplContext) {
    let id = exchange.id;
    let result = match disposition {
        Disposition::Status(code) => exchange.response.send_status(code).map_err(|e| e.to_string()),
        Disposition::Send(payload) => exchange.response.send(payload).map_err(|e| e.to_string()),
        Disposition::Pipe(stream) => runtime.pipe_into_response(&stream),
        Disposition::Defer(thenable) => runtime.defer(&thenable, id),
        Disposition::Ignore => Ok(()),
    };

    if let Err(err) = result {
        tracing::warn!("Could not answer {}: {}", id, err);
    }
}
