//! HTTP surface shared by both boards.
//!
//! Uses `tiny_http`, which works on both host and ESP32 (via std::net). The
//! server is polled from a local task so route handlers can touch the
//! device state directly; handlers are plain functions from request to
//! [`Reply`] and are tested without sockets.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::io::Read;
use std::net::Ipv4Addr;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub use tiny_http::Method as HttpMethod;

/// Delay between polls of an idle server.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Largest request body read; longer bodies are rejected.
const MAX_BODY: usize = 4096;

/// A response produced by a route handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub location: Option<String>,
}

impl Reply {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
            location: None,
        }
    }

    /// JSON document. Falls back to a 500 if `value` cannot be encoded.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
                location: None,
            },
            Err(e) => Self::message(500, &format!("encode failed: {}", e)),
        }
    }

    /// `{"message": ...}` error document.
    pub fn message(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: serde_json::json!({ "message": message }).to_string(),
            location: None,
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            content_type: "text/plain",
            body: format!("See {}", location),
            location: Some(location.to_string()),
        }
    }

    pub fn not_found() -> Self {
        Self::text(404, "Not Found")
    }

    pub fn method_not_allowed() -> Self {
        Self::text(405, "Method Not Allowed")
    }
}

/// A table of routes.
pub trait Routes {
    /// Answer one request. `path` has its query string removed.
    fn handle(&self, method: &Method, path: &str, body: &[u8]) -> Reply;
}

impl<T: Routes + ?Sized> Routes for std::rc::Rc<T> {
    fn handle(&self, method: &Method, path: &str, body: &[u8]) -> Reply {
        (**self).handle(method, path, body)
    }
}

/// Polled HTTP server.
pub struct HttpServer {
    server: Server,
    addr: String,
}

impl HttpServer {
    /// Bind to `bind_addr` (use `None` for 0.0.0.0) and `port`.
    pub fn bind(bind_addr: Option<Ipv4Addr>, port: u16) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        info!("HTTP server listening on http://{}/", addr);
        Ok(Self { server, addr })
    }

    /// Serve requests until cancelled.
    pub async fn serve<R: Routes>(self, routes: R, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.server.try_recv() {
                Ok(Some(request)) => Self::answer(&routes, request),
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(POLL_INTERVAL) => {}
                    }
                }
                Err(e) => {
                    error!("HTTP server error: {}", e);
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
        info!("HTTP server on {} shutting down", self.addr);
    }

    fn answer<R: Routes>(routes: &R, mut request: Request) {
        let method = request.method().clone();
        let url = request.url().to_string();
        let path = url.split('?').next().unwrap_or("/");

        let mut body = Vec::new();
        let reply = match request
            .as_reader()
            .take(MAX_BODY as u64 + 1)
            .read_to_end(&mut body)
        {
            Ok(n) if n > MAX_BODY => Reply::text(413, "Payload Too Large"),
            Ok(_) => routes.handle(&method, path, &body),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                Reply::text(400, "Bad Request")
            }
        };
        debug!("{} {} -> {}", method, url, reply.status);

        let mut response = Response::from_string(reply.body).with_status_code(reply.status);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
            response = response.with_header(header);
        }
        if let Some(location) = reply.location {
            if let Ok(header) = Header::from_bytes(&b"Location"[..], location.as_bytes()) {
                response = response.with_header(header);
            }
        }
        if let Err(e) = request.respond(response) {
            warn!("Failed to send response: {}", e);
        }
    }
}

/// Split `/register/<mac>` into its address part.
pub fn register_target(path: &str) -> Option<&str> {
    path.strip_prefix("/register/")
        .map(|rest| rest.trim_end_matches('/'))
        .filter(|mac| !mac.is_empty() && !mac.contains('/'))
}
