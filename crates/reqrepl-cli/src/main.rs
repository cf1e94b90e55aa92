//! # reqrepl Entry Point
//!
//! Accepts HTTP requests on every path and lets the operator answer them,
//! oldest first, from a JavaScript shell.
//!
//! ## Usage
//!
//! ```bash
//! # Listen on $PORT, or 4000 when it is not set
//! reqrepl
//!
//! # Listen on a specific port and interface
//! reqrepl -p 8080 --host 127.0.0.1
//! ```

use anyhow::Result;
use argh::FromArgs;
use reqrepl_server::config::DEFAULT_HOST;
use reqrepl_server::{Config, Controller, HttpServer, Session};
use tokio::sync::mpsc;

/// Answer HTTP requests by hand from a JavaScript shell.
#[derive(FromArgs)]
struct Cli {
    /// port to listen on
    ///
    /// Overrides the PORT environment variable. Defaults to 4000.
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// interface to listen on
    #[argh(option, default = "DEFAULT_HOST.to_owned()")]
    host: String,
}

impl Cli {
    fn config(&self, base: Config) -> Config {
        let config = base.with_host(self.host.clone());
        match self.port {
            Some(port) => config.with_port(port),
            None => config,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Logs go to stderr so they stay apart from evaluation output
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config(Config::from_env()?);
    let server = HttpServer::bind(config.socket_addr()?).await?;
    let port = server.local_addr()?.port();

    let (events, receiver) = mpsc::unbounded_channel();
    let session = Session::new(events.clone())?;

    println!("Listening on port {}.", port);
    println!("Respond to requests by returning a value in the shell, or by using `req` and `res`. Type .help for more.");

    let console = reqrepl_cli::shell::start(events.clone())?;

    let listener_events = events.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run(listener_events).await {
            tracing::error!("HTTP listener stopped: {}", e);
        }
    });
    drop(events);

    Controller::new(session, console, receiver).run().await?;

    // Exit without waiting on open connections or blocking file reads
    std::process::exit(0)
}
