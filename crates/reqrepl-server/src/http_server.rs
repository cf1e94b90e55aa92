//! HTTP Listener
//!
//! Accepts HTTP/1.1 connections with hyper and turns every request into a
//! [`PendingExchange`] posted to the controller as [`Event::Arrived`].
//!
//! # Architecture
//!
//! The listener:
//! - Binds a TCP socket up front, so a bind failure stops startup
//! - Spawns a tokio task for each connection
//! - Collects the request body and assigns the next [`ExchangeId`]
//! - Waits on the exchange's reply channel until the operator answers
//!
//! If the controller has gone away the client gets `503 Service Unavailable`.
//!
//! # Example
//!
//! ```no_run
//! use reqrepl_server::{Config, HttpServer};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> reqrepl_common::Result<()> {
//! let (events, _receiver) = mpsc::unbounded_channel();
//! let server = HttpServer::bind(Config::from_env()?.socket_addr()?).await?;
//! tokio::spawn(server.run(events));
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use reqrepl_common::transport::http::{bad_request, service_unavailable};
use reqrepl_common::{HyperRequest, HyperResponse, ReqreplError, RequestHandle, ResponseHandle, Result};
use tokio::net::TcpListener;

use crate::event::{Event, EventSender};
use crate::exchange::{ExchangeId, PendingExchange};

pub struct HttpServer {
    listener: TcpListener,
    next_id: Arc<AtomicU64>,
}

impl HttpServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `ReqreplError::Transport` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await
            .map_err(|e| ReqreplError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
            .map_err(|e| ReqreplError::Transport(format!("Failed to get local address: {}", e)))
    }

    /// Accepts connections until accepting fails.
    pub async fn run(self, events: EventSender) -> Result<()> {
        tracing::info!("HTTP listener on {}", self.local_addr()?);

        loop {
            let (stream, peer) = self.listener.accept().await
                .map_err(|e| ReqreplError::Transport(format!("Failed to accept connection: {}", e)))?;
            tracing::debug!("Connection from {}", peer);

            let io = TokioIo::new(stream);
            let events = events.clone();
            let next_id = self.next_id.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let events = events.clone();
                    let next_id = next_id.clone();
                    async move { Self::handle_request(req, events, next_id).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    tracing::debug!("Error serving connection from {}: {}", peer, err);
                }
            });
        }
    }

    async fn handle_request(
        req: HyperRequest,
        events: EventSender,
        next_id: Arc<AtomicU64>,
    ) -> std::result::Result<HyperResponse, Infallible> {
        let request = match RequestHandle::from_hyper(req).await {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("{}", e);
                return Ok(bad_request());
            }
        };

        let id = ExchangeId(next_id.fetch_add(1, Ordering::Relaxed));
        let (response, reply) = ResponseHandle::channel();

        if events.send(Event::Arrived(PendingExchange::new(id, request, response))).is_err() {
            tracing::warn!("Controller is gone, refusing {}", id);
            return Ok(service_unavailable());
        }

        match reply.await {
            Ok(response) => Ok(response),
            Err(_) => {
                tracing::debug!("{} was dropped without a response", id);
                Ok(service_unavailable())
            }
        }
    }
}
