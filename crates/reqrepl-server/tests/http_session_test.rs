//! HTTP Session Integration Tests
//!
//! Runs the real hyper listener on an ephemeral port with the controller
//! and a recording console, and talks to it with `reqwest`.
//!
//! Test Scenarios:
//! 1. Status-only answers and the idle prompt
//! 2. FIFO promotion with the queue count in the prompt
//! 3. Inspecting request bindings never answers the request
//! 4. Deferred answers from promises
//! 5. Piping a file into the response
//! 6. The `req` and `res` objects

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use reqrepl_server::{Console, Controller, Evaluation, Event, EventSender, HttpServer, Session};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Clone, Default)]
struct RecordingConsole {
    prompts: Rc<RefCell<Vec<String>>>,
}

impl Console for RecordingConsole {
    fn set_prompt(&self, prompt: &str) {
        self.prompts.borrow_mut().push(prompt.to_owned());
    }

    fn announce(&self, _prompt: &str) {}
}

struct Harness {
    addr: SocketAddr,
    events: EventSender,
    console: RecordingConsole,
    client: reqwest::Client,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn get(&self, path: &str) -> JoinHandle<reqwest::Response> {
        let request = self.client.get(self.url(path));
        tokio::spawn(async move { request.send().await.unwrap() })
    }

    fn post(&self, path: &str, body: &'static str) -> JoinHandle<reqwest::Response> {
        let request = self.client.post(self.url(path)).body(body);
        tokio::spawn(async move { request.send().await.unwrap() })
    }

    async fn eval(&self, source: &str) -> Evaluation {
        let (reply, evaluation) = oneshot::channel();
        self.events
            .send(Event::Input { source: source.to_owned(), reply: Some(reply) })
            .unwrap();
        evaluation.await.unwrap()
    }

    /// Waits until the console shows `prompt`.
    async fn wait_for_prompt(&self, prompt: &str) {
        let shown = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.console.prompts.borrow().last().map(String::as_str) == Some(prompt) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            shown.is_ok(),
            "prompt never became {:?}, saw {:?}",
            prompt,
            self.console.prompts.borrow()
        );
    }

    fn exit(&self) {
        self.events.send(Event::Exit).unwrap();
    }
}

async fn start() -> (Harness, Controller<RecordingConsole>) {
    let server = HttpServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (events, receiver) = mpsc::unbounded_channel();
    tokio::spawn(server.run(events.clone()));

    let console = RecordingConsole::default();
    let session = Session::new(events.clone()).unwrap();
    let controller = Controller::new(session, console.clone(), receiver);

    let harness = Harness {
        addr,
        events,
        console,
        client: reqwest::Client::new(),
    };
    (harness, controller)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_status_answer_returns_to_idle() {
    let (h, controller) = start().await;

    let script = async {
        let pending = h.get("/hello");
        h.wait_for_prompt("GET /hello > ").await;

        assert_eq!(h.eval("200").await, Evaluation::Value("200".into()));
        let response = pending.await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "OK");

        h.wait_for_prompt("> ").await;
        h.exit();
    };

    let (ran, ()) = tokio::join!(controller.run(), script);
    ran.unwrap();
}

#[tokio::test]
async fn test_requests_are_answered_in_arrival_order() {
    let (h, controller) = start().await;

    let script = async {
        let first = h.get("/first");
        h.wait_for_prompt("GET /first > ").await;
        let second = h.post("/second", "");
        h.wait_for_prompt("GET /first (1) > ").await;

        h.eval("'one'").await;
        let response = first.await.unwrap();
        assert_eq!(
            response.headers()["content-type"],
            "text/html; charset=utf-8"
        );
        assert_eq!(response.text().await.unwrap(), "one");

        h.wait_for_prompt("POST /second > ").await;
        h.eval("{a: 1}").await;
        let response = second.await.unwrap();
        assert_eq!(
            response.headers()["content-type"],
            "application/json; charset=utf-8"
        );
        assert_eq!(response.text().await.unwrap(), r#"{"a":1}"#);

        h.wait_for_prompt("> ").await;
        h.exit();
    };

    let (ran, ()) = tokio::join!(controller.run(), script);
    ran.unwrap();
}

#[tokio::test]
async fn test_inspecting_the_request_does_not_answer_it() {
    let (h, controller) = start().await;

    let script = async {
        let pending = h.get("/users?page=2");
        h.wait_for_prompt("GET /users?page=2 > ").await;

        assert_eq!(h.eval("url").await, Evaluation::Value("\"/users?page=2\"".into()));
        assert_eq!(h.eval("method").await, Evaluation::Value("\"GET\"".into()));
        h.eval("headers").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        h.eval("404").await;
        assert_eq!(pending.await.unwrap().status(), 404);
        h.exit();
    };

    let (ran, ()) = tokio::join!(controller.run(), script);
    ran.unwrap();
}

#[tokio::test]
async fn test_promise_answers_after_it_settles() {
    let (h, controller) = start().await;

    let script = async {
        let pending = h.get("/slow");
        h.wait_for_prompt("GET /slow > ").await;

        h.eval("delay(50, 'later')").await;
        assert_eq!(h.console.prompts.borrow().last().unwrap(), "GET /slow > ");

        let response = pending.await.unwrap();
        assert_eq!(response.text().await.unwrap(), "later");
        h.wait_for_prompt("> ").await;
        h.exit();
    };

    let (ran, ()) = tokio::join!(controller.run(), script);
    ran.unwrap();
}

#[tokio::test]
async fn test_file_is_piped_into_the_response() {
    let (h, controller) = start().await;
    let file = tempfile::NamedTempFile::new().unwrap();
    let contents = "line\n".repeat(10_000);
    std::fs::write(file.path(), &contents).unwrap();
    let path = serde_json::to_string(file.path().to_str().unwrap()).unwrap();

    let script = async {
        let pending = h.get("/download");
        h.wait_for_prompt("GET /download > ").await;

        h.eval(&format!("header('Content-Type', 'text/plain'); fs.createReadStream({})", path)).await;
        let response = pending.await.unwrap();
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.text().await.unwrap(), contents);

        h.wait_for_prompt("> ").await;
        h.exit();
    };

    let (ran, ()) = tokio::join!(controller.run(), script);
    ran.unwrap();
}

#[tokio::test]
async fn test_req_and_res_objects() {
    let (h, controller) = start().await;

    let script = async {
        let pending = h.post("/echo", "ping");
        h.wait_for_prompt("POST /echo > ").await;

        h.eval("res.status(201).set('X-Echo', req.method).json({ got: req.body })").await;
        let response = pending.await.unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.headers()["x-echo"], "POST");
        assert_eq!(response.text().await.unwrap(), r#"{"got":"ping"}"#);

        h.wait_for_prompt("> ").await;
        assert_eq!(
            h.eval("typeof req").await,
            Evaluation::Value("\"undefined\"".into())
        );
        h.exit();
    };

    let (ran, ()) = tokio::join!(controller.run(), script);
    ran.unwrap();
}
