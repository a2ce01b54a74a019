//! HTTP sender for send mode.
//!
//! Walks the configured step range and PUTs one random hex payload per
//! size, one request at a time. Any transport error or non-200 status
//! stops the run.

use crate::config::SendConfig;
use crate::payload::{random_hex, StepSizes};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::header::HOST;
use hyper::http::uri::InvalidUri;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] InvalidUri),
    #[error("unsupported protocol scheme \"{0}\"")]
    UnsupportedScheme(String),
    #[error("url has no host")]
    MissingHost,
    #[error("failed to generate bytes: {0}")]
    Payload(#[from] rand::Error),
    #[error("could not make request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("could not execute request: {0}")]
    Connect(#[source] std::io::Error),
    #[error("could not execute request: {0}")]
    Transport(#[from] hyper::Error),
    #[error("did not get 200 response, got {}", .0.as_u16())]
    UnexpectedStatus(StatusCode),
}

/// Where requests go: socket address to dial, `Host` header and request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub connect_addr: String,
    pub host: String,
    pub path: String,
}

impl Target {
    /// Parse an `http://` URL. A bare `host:port` is treated as http.
    pub fn parse(url: &str) -> Result<Self, SendError> {
        let uri: Uri = url.parse()?;

        match uri.scheme_str() {
            None | Some("http") => {}
            Some(other) => return Err(SendError::UnsupportedScheme(other.to_string())),
        }

        let authority = uri.authority().ok_or(SendError::MissingHost)?;
        if authority.host().is_empty() {
            return Err(SendError::MissingHost);
        }

        let host = match authority.port_u16() {
            Some(port) => format!("{}:{}", authority.host(), port),
            None => authority.host().to_string(),
        };
        let connect_addr = format!(
            "{}:{}",
            authority.host(),
            authority.port_u16().unwrap_or(DEFAULT_HTTP_PORT)
        );

        let mut path = match uri.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        if let Some(query) = uri.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Target {
            connect_addr,
            host,
            path,
        })
    }
}

/// Totals for a completed run
#[derive(Debug, Default, Clone, Copy)]
pub struct SendReport {
    pub requests: usize,
    pub bytes: usize,
    pub elapsed: Duration,
}

/// Send every step size in order.
pub async fn run(config: &SendConfig) -> Result<SendReport, SendError> {
    let target = Target::parse(&config.url)?;
    info!(
        url = %config.url,
        start_step = config.start_step,
        end_step = config.end_step,
        "Starting send"
    );

    let started = Instant::now();
    let mut report = SendReport::default();

    for size in StepSizes::new(config.start_step, config.end_step) {
        info!("sending {} bytes", size);
        let payload = random_hex(size)?;

        let sent_at = Instant::now();
        let status = put(&target, payload).await?;
        if status != StatusCode::OK {
            return Err(SendError::UnexpectedStatus(status));
        }
        debug!(bytes = size, elapsed = ?sent_at.elapsed(), "Request complete");

        report.requests += 1;
        report.bytes += size;
    }

    report.elapsed = started.elapsed();
    Ok(report)
}

/// Issue one PUT on a fresh connection and drain the response.
async fn put(target: &Target, body: Bytes) -> Result<StatusCode, SendError> {
    let stream = TcpStream::connect(&target.connect_addr)
        .await
        .map_err(SendError::Connect)?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "Connection error");
        }
    });

    let request = Request::builder()
        .method(Method::PUT)
        .uri(target.path.as_str())
        .header(HOST, target.host.as_str())
        .body(Full::new(body))?;

    let response = sender.send_request(request).await?;
    let status = response.status();
    response.into_body().collect().await?;

    Ok(status)
}
