// Copyright 2025 reqrepl Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Interactive Shell
//!
//! The line editor runs on its own OS thread because `readline` blocks.
//! Every submitted line becomes an `Event::Input` and the thread waits for
//! the rendered evaluation before reading the next line.
//!
//! The controller reports prompt changes through [`ShellConsole`]: the
//! prompt string is shared with the reader thread and announcements are
//! printed above the line being edited.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{anyhow, Result};
use reqrepl_server::slot::IDLE_PROMPT;
use reqrepl_server::{Console, Event, EventSender};
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, ExternalPrinter};
use tokio::sync::oneshot;

/// Prompt shared between the controller and the reader thread.
pub type SharedPrompt = Arc<Mutex<String>>;

type Printer = Box<dyn ExternalPrinter + Send>;

pub const HELP: &str = "\
Return a value to answer the current request:
  200                      send a status-only response
  'text' / Uint8Array      send a body (text/html or octet-stream)
  {a: 1} / [1, 2] / null   send JSON (or an empty body)
  fs.createReadStream(p)   pipe a file, socket or upstream body
  a promise                send whatever it resolves to

Request bindings: method, url, headers, req
Response object:  res.status(), res.set(), res.send(), res.json(), res.sendStatus(), res.end()
Helpers:          fs, net.connect, http.get, https.get, http.stream, status, header, delay

The prompt is redrawn when you submit a line. Requests that arrive or
finish while you are typing are announced above the input as \"-> <request>\";
press Enter on an empty line to refresh the prompt.

Commands:
  .help   show this message
  .exit   quit (also Ctrl+D)";

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Exit,
    Help,
    Blank,
    Evaluate(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => ShellCommand::Blank,
            ".exit" => ShellCommand::Exit,
            ".help" => ShellCommand::Help,
            _ => ShellCommand::Evaluate(line.to_owned()),
        }
    }
}

/// Console backed by the interactive line editor.
pub struct ShellConsole {
    prompt: SharedPrompt,
    printer: Option<Mutex<Printer>>,
}

impl Console for ShellConsole {
    fn set_prompt(&self, prompt: &str) {
        let mut shared = self.prompt.lock().unwrap_or_else(PoisonError::into_inner);
        prompt.clone_into(&mut shared);
    }

    fn announce(&self, prompt: &str) {
        let message = announcement(prompt);
        match &self.printer {
            Some(printer) => {
                let mut printer = printer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = printer.print(message) {
                    tracing::debug!("Could not print above the prompt: {}", e);
                }
            }
            None => println!("{}", message),
        }
    }
}

/// Text printed above the input line when the prompt changes on its own.
fn announcement(prompt: &str) -> String {
    let label = prompt.trim_end_matches(IDLE_PROMPT).trim_end();
    if label.is_empty() {
        "(no requests waiting)".to_owned()
    } else {
        format!("-> {}", label)
    }
}

/// Starts the reader thread and returns the console the controller uses.
///
/// # Errors
///
/// Fails if the terminal cannot be opened for line editing.
pub fn start(events: EventSender) -> Result<ShellConsole> {
    let prompt: SharedPrompt = Arc::new(Mutex::new(IDLE_PROMPT.to_owned()));
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

    let shared = prompt.clone();
    thread::Builder::new()
        .name("reqrepl-shell".into())
        .spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let printer = editor
                .create_external_printer()
                .ok()
                .map(|printer| Box::new(printer) as Printer);
            if ready_tx.send(Ok(printer)).is_ok() {
                read_lines(editor, shared, events);
            }
        })?;

    let printer = ready_rx
        .recv()
        .map_err(|_| anyhow!("Shell thread stopped during startup"))??;

    Ok(ShellConsole {
        prompt,
        printer: printer.map(Mutex::new),
    })
}

fn read_lines(mut editor: DefaultEditor, prompt: SharedPrompt, events: EventSender) {
    loop {
        let current = prompt.lock().unwrap_or_else(PoisonError::into_inner).clone();

        let line = match editor.readline(&current) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("(To exit, press Ctrl+D or type .exit)");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!("Shell input failed: {}", e);
                break;
            }
        };

        match ShellCommand::parse(&line) {
            ShellCommand::Blank => {}
            ShellCommand::Help => println!("{}", HELP),
            ShellCommand::Exit => break,
            ShellCommand::Evaluate(source) => {
                if let Err(e) = editor.add_history_entry(source.as_str()) {
                    tracing::debug!("Could not record history: {}", e);
                }

                let (reply, evaluation) = oneshot::channel();
                if events.send(Event::Input { source, reply: Some(reply) }).is_err() {
                    return;
                }
                match evaluation.blocking_recv() {
                    Ok(evaluation) => println!("{}", evaluation),
                    Err(_) => return,
                }
            }
        }
    }

    let _ = events.send(Event::Exit);
}
