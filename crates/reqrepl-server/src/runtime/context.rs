use std::rc::Rc;

use boa_engine::{
    Context, JsError, JsNativeError, Script, Source, js_string,
    object::JsObject,
    value::JsValue,
};
use reqrepl_common::{ReqreplError, Result};

use crate::event::EventSender;
use crate::exchange::{ExchangeId, PendingExchange};
use crate::runtime::bindings;
use crate::runtime::conversions::{headers_to_json, json_to_js_value};
use crate::runtime::job_executor::MicrotaskExecutor;
use crate::runtime::registry::{Directive, Registry, Resolution, SharedRegistry, TaskOutcome};

/// Globals describing the current exchange. All are `undefined` while idle.
const REQUEST_GLOBALS: [&str; 5] = ["method", "url", "headers", "req", "res"];

/// Values installed for the current exchange, kept to recognise them later.
struct RequestBindings {
    method: JsValue,
    url: JsValue,
    headers: JsValue,
    res: JsValue,
}

/// Boa context with the reqrepl bindings.
///
/// The context is `!Send` and lives on the controller thread for the whole
/// session. Promise jobs are queued in a [`MicrotaskExecutor`] and only run
/// when [`run_jobs`](Self::run_jobs) is called.
pub struct ReplContext {
    ctx: Context,
    jobs: Rc<MicrotaskExecutor>,
    registry: SharedRegistry,
    bindings: Option<RequestBindings>,
}

impl ReplContext {
    pub fn new(events: EventSender) -> Result<Self> {
        let jobs = Rc::new(MicrotaskExecutor::new());
        let ctx = Context::builder()
            .job_executor(jobs.clone())
            .build()
            .map_err(|e| ReqreplError::Script(format!("Failed to create context: {}", e)))?;

        let mut runtime = Self {
            ctx,
            jobs,
            registry: Registry::shared(events),
            bindings: None,
        };
        bindings::install_helpers(&mut runtime.ctx, &runtime.registry)?;
        runtime.bind("_", JsValue::undefined())?;
        runtime.unbind_request()?;
        Ok(runtime)
    }

    /// Evaluates one line of operator input and binds the result to `_`.
    ///
    /// Input wrapped in braces is first tried as an object literal. On error
    /// the rendered exception is returned and `_` keeps its previous value.
    pub fn evaluate(&mut self, source: &str) -> std::result::Result<JsValue, String> {
        let script = self.parse(source)?;
        let value = script.evaluate(&mut self.ctx).map_err(|e| self.describe(e))?;
        if let Err(err) = self.bind("_", value.clone()) {
            tracing::warn!("{}", err);
        }
        Ok(value)
    }

    fn parse(&mut self, source: &str) -> std::result::Result<Script, String> {
        let trimmed = source.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            let wrapped = format!("({})", trimmed);
            if let Ok(script) = Script::parse(Source::from_bytes(&wrapped), None, &mut self.ctx) {
                return Ok(script);
            }
        }
        Script::parse(Source::from_bytes(source), None, &mut self.ctx).map_err(|e| self.describe(e))
    }

    fn describe(&mut self, err: JsError) -> String {
        match err.try_native(&mut self.ctx) {
            Ok(native) => native.to_string(),
            Err(_) => err.to_string(),
        }
    }

    /// Renders a value the way the shell prints it.
    pub fn display(&self, value: &JsValue) -> String {
        value.display().to_string()
    }

    /// Installs `method`, `url`, `headers`, `req` and `res` for `exchange`.
    pub fn expose(&mut self, exchange: &PendingExchange) -> Result<()> {
        let request = &exchange.request;
        let method = JsValue::new(js_string!(request.method().as_str()));
        let url = JsValue::new(js_string!(request.url()));
        let headers = json_to_js_value(headers_to_json(request.headers()), &mut self.ctx)?;
        let req = bindings::request_object(&mut self.ctx, request, &method, &url, &headers);
        let res: JsValue = bindings::response_object(&mut self.ctx, &self.registry, exchange.id).into();

        self.registry.borrow_mut().set_current(Some(exchange.id));
        self.bind("method", method.clone())?;
        self.bind("url", url.clone())?;
        self.bind("headers", headers.clone())?;
        self.bind("req", req.into())?;
        self.bind("res", res.clone())?;

        self.bindings = Some(RequestBindings { method, url, headers, res });
        Ok(())
    }

    /// Resets the per-request globals to `undefined` and drops streams that
    /// were created but never piped.
    pub fn conceal(&mut self) -> Result<()> {
        let discarded = {
            let mut registry = self.registry.borrow_mut();
            registry.set_current(None);
            registry.discard_streams()
        };
        if discarded > 0 {
            tracing::debug!("Discarded {} unpiped stream(s)", discarded);
        }
        self.bindings = None;
        self.unbind_request()
    }

    fn unbind_request(&mut self) -> Result<()> {
        for name in REQUEST_GLOBALS {
            self.bind(name, JsValue::undefined())?;
        }
        Ok(())
    }

    fn bind(&mut self, name: &'static str, value: JsValue) -> Result<()> {
        let global = self.ctx.global_object();
        global
            .set(js_string!(name), value, false, &mut self.ctx)
            .map(|_| ())
            .map_err(|e| ReqreplError::Script(format!("Failed to bind '{}': {}", name, e)))
    }

    /// True if `value` is strictly equal to one of the installed aliases.
    pub fn is_alias(&self, value: &JsValue) -> bool {
        self.bindings.as_ref().is_some_and(|b| {
            [&b.method, &b.url, &b.headers]
                .into_iter()
                .any(|alias| value.strict_equals(alias))
        })
    }

    /// Looks up a callable property, treating a throwing getter as absent.
    pub fn method_of(&mut self, object: &JsObject, name: &'static str) -> Option<JsObject> {
        match object.get(js_string!(name), &mut self.ctx) {
            Ok(value) => value.as_callable().map(|f| f.clone()),
            Err(err) => {
                tracing::debug!("Reading '{}' threw: {}", name, err);
                None
            }
        }
    }

    /// Calls `stream.pipe(res)` with the current `res`.
    pub fn pipe_into_response(&mut self, stream: &JsObject) -> std::result::Result<(), String> {
        let pipe = self
            .method_of(stream, "pipe")
            .ok_or_else(|| "pipe is not callable".to_owned())?;
        let res = self
            .bindings
            .as_ref()
            .map(|b| b.res.clone())
            .unwrap_or_else(JsValue::undefined);

        pipe.call(&stream.clone().into(), &[res], &mut self.ctx)
            .map(|_| ())
            .map_err(|e| self.describe(e))
    }

    /// Subscribes a single-fire continuation to `thenable`, bound to `exchange`.
    pub fn defer(&mut self, thenable: &JsObject, exchange: ExchangeId) -> std::result::Result<(), String> {
        let then = self
            .method_of(thenable, "then")
            .ok_or_else(|| "then is not callable".to_owned())?;
        let (fulfilled, rejected) = bindings::continuation(&mut self.ctx, &self.registry, exchange);

        then.call(&thenable.clone().into(), &[fulfilled.into(), rejected.into()], &mut self.ctx)
            .map(|_| ())
            .map_err(|e| self.describe(e))
    }

    /// Settles the promise of a finished background task.
    pub fn settle(&mut self, outcome: TaskOutcome) {
        let Some(task) = self.registry.borrow_mut().take_task(outcome.id) else {
            tracing::debug!("No promise waiting for task {}", outcome.id);
            return;
        };

        let result = match outcome.result {
            Ok(Resolution::Text(text)) => {
                task.resolve.call(&JsValue::undefined(), &[JsValue::new(js_string!(text))], &mut self.ctx)
            }
            Ok(Resolution::Held) => {
                let value = task.held.unwrap_or_else(JsValue::undefined);
                task.resolve.call(&JsValue::undefined(), &[value], &mut self.ctx)
            }
            Err(message) => {
                let error = JsNativeError::error().with_message(message).to_opaque(&mut self.ctx);
                task.reject.call(&JsValue::undefined(), &[error.into()], &mut self.ctx)
            }
        };

        if let Err(err) = result {
            tracing::warn!("Settling task {} failed: {}", outcome.id, err);
        }
    }

    /// Runs queued promise jobs; returns how many ran.
    pub fn run_jobs(&mut self) -> usize {
        self.jobs.drain(&mut self.ctx)
    }

    pub fn take_directives(&self) -> Vec<Directive> {
        self.registry.borrow_mut().take_directives()
    }

    pub fn take_settled(&self) -> Vec<(ExchangeId, JsValue)> {
        self.registry.borrow_mut().take_settled()
    }

    pub fn pending_tasks(&self) -> usize {
        self.registry.borrow().pending_tasks()
    }

    pub fn held_streams(&self) -> usize {
        self.registry.borrow().held_streams()
    }

    pub fn http_client(&self) -> reqwest::Client {
        self.registry.borrow().http().clone()
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }
}
