//! Script-facing bindings for reqrepl
//!
//! This module provides the native Rust functions exposed to the operator's
//! JavaScript. None of them touch the transport directly: response commands,
//! stream sources and background tasks are recorded in the shared
//! [`Registry`](crate::runtime::registry::Registry) and picked up by the session after evaluation.
//!
//! # JavaScript API
//!
//! Globals installed once per session:
//!
//! - `fs.readFileSync(path[, encoding])`, `fs.writeFileSync(path, data)`,
//!   `fs.existsSync(path)`, `fs.readdirSync(path)`
//! - `fs.readFile(path)` - promise of the file text
//! - `fs.createReadStream(path)`, `net.connect(port[, host])`,
//!   `http.stream(url)` - pipeable sources
//! - `http.get(url)` / `https.get(url)` - promise of the response text
//! - `status(code)`, `header(name, value)` - act on the current response
//! - `delay(ms[, value])` - promise fulfilled with `value` after `ms`
//!
//! Per exchange, [`request_object`] and [`response_object`] build `req` and
//! `res`. Both, like the stream objects, have a `null` prototype so that the
//! dispatcher never mistakes them for plain data.

use std::cell::Cell;
use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use boa_engine::{
    Context, JsArgs, JsError, JsNativeError, JsResult, js_string,
    native_function::NativeFunction,
    object::{JsObject, ObjectInitializer, FunctionObjectBuilder, builtins::{JsArray, JsFunction, JsPromise, JsUint8Array}},
    property::Attribute,
    value::JsValue,
};
use boa_gc::{Finalize, Trace};
use reqrepl_common::{Payload, ReqreplError, RequestHandle, Result};

use crate::exchange::ExchangeId;
use crate::runtime::conversions::{js_value_to_json, payload_of, uint8_bytes};
use crate::runtime::registry::{Command, PendingTask, Resolution, SharedRegistry};
use crate::runtime::streams::StreamSource;

/// Capture for helpers that act on whatever exchange is current.
#[derive(Clone, Trace, Finalize)]
struct Host {
    #[unsafe_ignore_trace]
    registry: SharedRegistry,
}

/// Capture for `res` methods, bound to the exchange `res` was built for.
#[derive(Clone, Trace, Finalize)]
struct Bound {
    #[unsafe_ignore_trace]
    registry: SharedRegistry,
    #[unsafe_ignore_trace]
    exchange: ExchangeId,
}

#[derive(Clone, Trace, Finalize)]
struct StreamHandle {
    #[unsafe_ignore_trace]
    registry: SharedRegistry,
    id: u64,
}

/// Shared by the fulfil and reject callbacks of one deferred result.
#[derive(Clone, Trace, Finalize)]
struct Continuation {
    #[unsafe_ignore_trace]
    registry: SharedRegistry,
    #[unsafe_ignore_trace]
    exchange: ExchangeId,
    #[unsafe_ignore_trace]
    fired: Rc<Cell<bool>>,
}

/// Installs the session-wide globals.
pub(crate) fn install_helpers(ctx: &mut Context, registry: &SharedRegistry) -> Result<()> {
    let host = Host { registry: Rc::clone(registry) };

    let fs = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_fn_ptr(read_file_sync), js_string!("readFileSync"), 2)
        .function(NativeFunction::from_fn_ptr(write_file_sync), js_string!("writeFileSync"), 2)
        .function(NativeFunction::from_fn_ptr(exists_sync), js_string!("existsSync"), 1)
        .function(NativeFunction::from_fn_ptr(readdir_sync), js_string!("readdirSync"), 1)
        .function(NativeFunction::from_copy_closure_with_captures(read_file, host.clone()), js_string!("readFile"), 1)
        .function(
            NativeFunction::from_copy_closure_with_captures(create_read_stream, host.clone()),
            js_string!("createReadStream"),
            1,
        )
        .build();

    let net = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_copy_closure_with_captures(net_connect, host.clone()), js_string!("connect"), 2)
        .build();

    let http = http_client_object(ctx, &host);
    let https = http_client_object(ctx, &host);

    register(ctx, "fs", fs.into())?;
    register(ctx, "net", net.into())?;
    register(ctx, "http", http.into())?;
    register(ctx, "https", https.into())?;

    let status = global_function(ctx, "status", 1, NativeFunction::from_copy_closure_with_captures(set_status, host.clone()));
    let header = global_function(ctx, "header", 2, NativeFunction::from_copy_closure_with_captures(set_header, host.clone()));
    let delay_fn = global_function(ctx, "delay", 2, NativeFunction::from_copy_closure_with_captures(delay, host));
    register(ctx, "status", status.into())?;
    register(ctx, "header", header.into())?;
    register(ctx, "delay", delay_fn.into())?;

    Ok(())
}

fn http_client_object(ctx: &mut Context, host: &Host) -> JsObject {
    ObjectInitializer::new(ctx)
        .function(NativeFunction::from_copy_closure_with_captures(http_get, host.clone()), js_string!("get"), 1)
        .function(NativeFunction::from_copy_closure_with_captures(http_stream, host.clone()), js_string!("stream"), 1)
        .build()
}

fn global_function(ctx: &mut Context, name: &'static str, length: usize, function: NativeFunction) -> JsFunction {
    FunctionObjectBuilder::new(ctx.realm(), function)
        .name(js_string!(name))
        .length(length)
        .build()
}

fn register(ctx: &mut Context, name: &'static str, value: JsValue) -> Result<()> {
    ctx.register_global_property(js_string!(name), value, Attribute::all())
        .map_err(|e| ReqreplError::Script(format!("Failed to install '{}': {}", name, e)))
}

/// Builds `req` for an exchange, sharing the alias values so that
/// `req.method === method`.
pub(crate) fn request_object(
    ctx: &mut Context,
    request: &RequestHandle,
    method: &JsValue,
    url: &JsValue,
    headers: &JsValue,
) -> JsObject {
    let body = String::from_utf8_lossy(request.body()).into_owned();
    let object = ObjectInitializer::new(ctx)
        .property(js_string!("method"), method.clone(), Attribute::all())
        .property(js_string!("url"), url.clone(), Attribute::all())
        .property(js_string!("headers"), headers.clone(), Attribute::all())
        .property(js_string!("httpVersion"), js_string!(request.version_label()), Attribute::all())
        .property(js_string!("body"), js_string!(body), Attribute::all())
        .build();
    object.set_prototype(None);
    object
}

/// Builds `res` for an exchange.
pub(crate) fn response_object(ctx: &mut Context, registry: &SharedRegistry, exchange: ExchangeId) -> JsObject {
    let bound = Bound { registry: Rc::clone(registry), exchange };
    let object = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_copy_closure_with_captures(res_status, bound.clone()), js_string!("status"), 1)
        .function(NativeFunction::from_copy_closure_with_captures(res_send_status, bound.clone()), js_string!("sendStatus"), 1)
        .function(NativeFunction::from_copy_closure_with_captures(res_set, bound.clone()), js_string!("set"), 2)
        .function(NativeFunction::from_copy_closure_with_captures(res_send, bound.clone()), js_string!("send"), 1)
        .function(NativeFunction::from_copy_closure_with_captures(res_json, bound.clone()), js_string!("json"), 1)
        .function(NativeFunction::from_copy_closure_with_captures(res_end, bound), js_string!("end"), 0)
        .build();
    object.set_prototype(None);
    object
}

/// Builds the single-fire `then` callbacks for a deferred result.
///
/// Fulfilment records the value for the session; rejection is logged and
/// dropped. Whichever fires first disarms both.
pub(crate) fn continuation(ctx: &mut Context, registry: &SharedRegistry, exchange: ExchangeId) -> (JsFunction, JsFunction) {
    let state = Continuation {
        registry: Rc::clone(registry),
        exchange,
        fired: Rc::new(Cell::new(false)),
    };
    let fulfilled = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(on_fulfilled, state.clone()),
    )
    .length(1)
    .build();
    let rejected = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(on_rejected, state),
    )
    .length(1)
    .build();
    (fulfilled, rejected)
}

fn on_fulfilled(_this: &JsValue, args: &[JsValue], state: &Continuation, _ctx: &mut Context) -> JsResult<JsValue> {
    if !state.fired.replace(true) {
        state.registry.borrow_mut().push_settled(state.exchange, args.get_or_undefined(0).clone());
    }
    Ok(JsValue::undefined())
}

fn on_rejected(_this: &JsValue, args: &[JsValue], state: &Continuation, _ctx: &mut Context) -> JsResult<JsValue> {
    if !state.fired.replace(true) {
        tracing::debug!(
            "Deferred result for {} was rejected: {}",
            state.exchange,
            args.get_or_undefined(0).display()
        );
    }
    Ok(JsValue::undefined())
}

// fs

fn read_file_sync(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let path = path_arg(args, ctx)?;
    let bytes = std::fs::read(&path).map_err(|e| io_error(&path, e))?;

    let encoding = args.get_or_undefined(1);
    if encoding.is_undefined() || encoding.is_null() {
        return Ok(JsUint8Array::from_iter(bytes, ctx)?.into());
    }
    Ok(JsValue::new(js_string!(String::from_utf8_lossy(&bytes).into_owned())))
}

fn write_file_sync(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let path = path_arg(args, ctx)?;
    let data = args.get_or_undefined(1);

    let bytes = match data.as_object().map(|o| o.clone()) {
        Some(object) if JsUint8Array::from_object(object.clone()).is_ok() => {
            uint8_bytes(&object, ctx).map_err(to_js_error)?.to_vec()
        }
        _ => data.to_string(ctx)?.to_std_string_escaped().into_bytes(),
    };
    std::fs::write(&path, bytes).map_err(|e| io_error(&path, e))?;
    Ok(JsValue::undefined())
}

fn exists_sync(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let path = path_arg(args, ctx)?;
    Ok(JsValue::new(path.exists()))
}

fn readdir_sync(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let path = path_arg(args, ctx)?;
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&path).map_err(|e| io_error(&path, e))? {
        let entry = entry.map_err(|e| io_error(&path, e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let names = names.into_iter().map(|name| JsValue::new(js_string!(name)));
    Ok(JsArray::from_iter(names, ctx).into())
}

fn read_file(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let path = path_arg(args, ctx)?;
    spawn_promise(host, None, ctx, async move {
        tokio::fs::read_to_string(&path)
            .await
            .map(Resolution::Text)
            .map_err(|e| format!("{}: {}", path.display(), e))
    })
}

fn create_read_stream(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let path = path_arg(args, ctx)?;
    Ok(stream_object(ctx, host, StreamSource::File(path)))
}

// net

fn net_connect(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let port = args.get_or_undefined(0).to_number(ctx)?;
    if port.fract() != 0.0 || !(1.0..=65535.0).contains(&port) {
        return Err(JsNativeError::range().with_message(format!("Invalid port: {}", port)).into());
    }

    let target = args.get_or_undefined(1);
    let target = if target.is_undefined() {
        "localhost".to_owned()
    } else {
        target.to_string(ctx)?.to_std_string_escaped()
    };

    Ok(stream_object(ctx, host, StreamSource::Socket { host: target, port: port as u16 }))
}

// http / https

fn http_get(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let url = string_arg(args, 0, "url", ctx)?;
    let client = host.registry.borrow().http().clone();
    spawn_promise(host, None, ctx, async move {
        let response = client.get(&url).send().await.map_err(|e| e.to_string())?;
        response.text().await.map(Resolution::Text).map_err(|e| e.to_string())
    })
}

fn http_stream(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let url = string_arg(args, 0, "url", ctx)?;
    Ok(stream_object(ctx, host, StreamSource::Remote(url)))
}

// current response

fn set_status(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let exchange = current_exchange(host)?;
    let code = status_arg(args, ctx)?;
    host.registry.borrow_mut().push(exchange, Command::SetStatus(code));
    Ok(JsValue::undefined())
}

fn set_header(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let exchange = current_exchange(host)?;
    let name = string_arg(args, 0, "name", ctx)?;
    let value = string_arg(args, 1, "value", ctx)?;
    host.registry.borrow_mut().push(exchange, Command::Header(name, value));
    Ok(JsValue::undefined())
}

fn delay(_this: &JsValue, args: &[JsValue], host: &Host, ctx: &mut Context) -> JsResult<JsValue> {
    let ms = args.get_or_undefined(0).to_number(ctx)?;
    let ms = if ms.is_finite() && ms > 0.0 { ms as u64 } else { 0 };
    let held = args.get_or_undefined(1).clone();

    spawn_promise(host, Some(held), ctx, async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Resolution::Held)
    })
}

// res

fn res_status(this: &JsValue, args: &[JsValue], bound: &Bound, ctx: &mut Context) -> JsResult<JsValue> {
    let code = status_arg(args, ctx)?;
    bound.registry.borrow_mut().push(bound.exchange, Command::SetStatus(code));
    Ok(this.clone())
}

fn res_send_status(_this: &JsValue, args: &[JsValue], bound: &Bound, ctx: &mut Context) -> JsResult<JsValue> {
    let code = status_arg(args, ctx)?;
    bound.registry.borrow_mut().push(bound.exchange, Command::SendStatus(code));
    Ok(JsValue::undefined())
}

fn res_set(this: &JsValue, args: &[JsValue], bound: &Bound, ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "name", ctx)?;
    let value = string_arg(args, 1, "value", ctx)?;
    bound.registry.borrow_mut().push(bound.exchange, Command::Header(name, value));
    Ok(this.clone())
}

fn res_send(_this: &JsValue, args: &[JsValue], bound: &Bound, ctx: &mut Context) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0);
    let payload = if value.is_undefined() {
        Payload::Empty
    } else {
        match payload_of(value, ctx).map_err(to_js_error)? {
            Some(payload) => payload,
            None => Payload::Json(js_value_to_json(value, ctx).map_err(to_js_error)?),
        }
    };
    bound.registry.borrow_mut().push(bound.exchange, Command::Send(payload));
    Ok(JsValue::undefined())
}

fn res_json(_this: &JsValue, args: &[JsValue], bound: &Bound, ctx: &mut Context) -> JsResult<JsValue> {
    let json = js_value_to_json(args.get_or_undefined(0), ctx).map_err(to_js_error)?;
    bound.registry.borrow_mut().push(bound.exchange, Command::Send(Payload::Json(json)));
    Ok(JsValue::undefined())
}

fn res_end(_this: &JsValue, _args: &[JsValue], bound: &Bound, _ctx: &mut Context) -> JsResult<JsValue> {
    bound.registry.borrow_mut().push(bound.exchange, Command::End);
    Ok(JsValue::undefined())
}

// streams

fn stream_object(ctx: &mut Context, host: &Host, source: StreamSource) -> JsValue {
    let kind = source.kind();
    let id = host.registry.borrow_mut().register_stream(source);
    let handle = StreamHandle { registry: Rc::clone(&host.registry), id };

    let object = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_copy_closure_with_captures(pipe_stream, handle), js_string!("pipe"), 1)
        .property(js_string!("kind"), js_string!(kind), Attribute::READONLY | Attribute::ENUMERABLE)
        .build();
    object.set_prototype(None);
    object.into()
}

/// `stream.pipe(destination)`: queues the stream for the current response.
fn pipe_stream(_this: &JsValue, args: &[JsValue], handle: &StreamHandle, _ctx: &mut Context) -> JsResult<JsValue> {
    let exchange = handle.registry.borrow().current().ok_or_else(no_current_request)?;
    let source = handle
        .registry
        .borrow_mut()
        .take_stream(handle.id)
        .ok_or_else(|| JsNativeError::typ().with_message("This stream has already been piped or has expired"))?;

    tracing::debug!("Piping {} stream into {}", source.kind(), exchange);
    handle.registry.borrow_mut().push(exchange, Command::Pipe(source));
    Ok(args.get_or_undefined(0).clone())
}

// helpers

fn spawn_promise<F>(host: &Host, held: Option<JsValue>, ctx: &mut Context, work: F) -> JsResult<JsValue>
where
    F: Future<Output = std::result::Result<Resolution, String>> + Send + 'static,
{
    let (promise, resolvers) = JsPromise::new_pending(ctx);
    let task = PendingTask {
        resolve: resolvers.resolve,
        reject: resolvers.reject,
        held,
    };
    host.registry
        .borrow_mut()
        .start_task(task, work)
        .map_err(|e| JsNativeError::error().with_message(e))?;
    Ok(promise.into())
}

fn current_exchange(host: &Host) -> JsResult<ExchangeId> {
    host.registry.borrow().current().ok_or_else(|| no_current_request().into())
}

fn no_current_request() -> JsNativeError {
    JsNativeError::typ().with_message("No request is waiting for a response")
}

fn string_arg(args: &[JsValue], index: usize, what: &str, ctx: &mut Context) -> JsResult<String> {
    let value = args.get_or_undefined(index);
    if value.is_undefined() {
        return Err(JsNativeError::typ().with_message(format!("Missing argument: {}", what)).into());
    }
    Ok(value.to_string(ctx)?.to_std_string_escaped())
}

fn path_arg(args: &[JsValue], ctx: &mut Context) -> JsResult<PathBuf> {
    string_arg(args, 0, "path", ctx).map(PathBuf::from)
}

fn status_arg(args: &[JsValue], ctx: &mut Context) -> JsResult<u16> {
    let code = args.get_or_undefined(0).to_number(ctx)?;
    if code.fract() != 0.0 || !(100.0..=999.0).contains(&code) {
        return Err(JsNativeError::range().with_message(format!("Invalid status code: {}", code)).into());
    }
    Ok(code as u16)
}

fn io_error(path: &std::path::Path, err: std::io::Error) -> JsError {
    JsNativeError::error().with_message(format!("{}: {}", path.display(), err)).into()
}

fn to_js_error(err: ReqreplError) -> JsError {
    JsNativeError::typ().with_message(err.to_string()).into()
}
