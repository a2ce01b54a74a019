//! HTTP listener for listen mode.
//!
//! Accepts connections, serves each on its own task with hyper's HTTP/1
//! server and logs how many body bytes every non-GET request carried.

use crate::config::ListenConfig;
use bytes::{Buf, Bytes};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 10000;

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("could not bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),
}

/// State shared by every connection
struct Shared {
    resp_delay: Duration,
    requests: AtomicU64,
    body_bytes: AtomicU64,
}

/// Listener instance
pub struct Listener {
    listener: TcpListener,
    shared: Arc<Shared>,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Bind the configured address.
    pub async fn bind(config: &ListenConfig) -> Result<Self, ListenError> {
        let listener =
            TcpListener::bind(&config.address)
                .await
                .map_err(|source| ListenError::Bind {
                    address: config.address.clone(),
                    source,
                })?;

        Ok(Listener {
            listener,
            shared: Arc::new(Shared {
                resp_delay: config.resp_delay,
                requests: AtomicU64::new(0),
                body_bytes: AtomicU64::new(0),
            }),
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<(), ListenError> {
        match self.local_addr() {
            Ok(addr) => info!(address = %addr, "listening"),
            Err(_) => info!("listening"),
        }

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let shared = Arc::clone(&self.shared);
                    let io = TokioIo::new(stream);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            handle_request(req, peer, Arc::clone(&shared))
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            if !e.is_incomplete_message() {
                                debug!(peer = %peer, error = %e, "Connection error");
                            }
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single request
async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    // ignore gets
    if req.method() == Method::GET {
        trace!(peer = %peer, path = %req.uri().path(), "Ignoring GET");
        return Ok(empty_response(StatusCode::OK));
    }

    let count = shared.requests.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        peer = %peer,
        method = %req.method(),
        path = %req.uri().path(),
        count,
        "received request"
    );

    if !shared.resp_delay.is_zero() {
        info!(
            "waiting {} before reading/responding...",
            humantime::format_duration(shared.resp_delay)
        );
        tokio::time::sleep(shared.resp_delay).await;
    }

    match body_len(req.into_body()).await {
        Ok(n) => {
            let total = shared.body_bytes.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
            info!(bytes = n, total, "read {} bytes from body", n);
            Ok(empty_response(StatusCode::OK))
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "error reading body");
            Ok(empty_response(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Count body bytes frame by frame without buffering the whole body.
async fn body_len<B>(mut body: B) -> Result<usize, B::Error>
where
    B: Body + Unpin,
{
    let mut total = 0;
    while let Some(frame) = body.frame().await {
        if let Some(data) = frame?.data_ref() {
            total += data.remaining();
        }
    }
    Ok(total)
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
