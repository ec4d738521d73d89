//! Remote calls between hub and trigger units.
//!
//! [`PeerLink`] is the seam used by the dispatchers and the health loop;
//! [`HttpPeerLink`] implements it over HTTP with `reqwest`. Callers bound
//! every call with their own timeout.

use crate::device::TriggerStatus;
use crate::registry::{Registration, RegistryEntry};
use serde::Deserialize;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

/// `errno` value of the out-of-memory class.
const ENOMEM: i32 = 12;

/// True for the out-of-memory class of I/O errors.
pub fn is_out_of_memory(e: &io::Error) -> bool {
    e.raw_os_error() == Some(ENOMEM) || e.kind() == io::ErrorKind::OutOfMemory
}

/// Link errors.
#[derive(Debug)]
pub enum LinkError {
    /// The caller's time budget ran out.
    Timeout,
    /// The peer answered with something unexpected.
    UnexpectedReply(String),
    /// The peer answered with an error status.
    Status { code: u16, message: String },
    /// HTTP client failure.
    Http(reqwest::Error),
    /// Generic I/O error.
    Io(io::Error),
}

impl LinkError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// True if an out-of-memory error appears anywhere in the source chain.
    pub fn is_resource_exhaustion(&self) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = match self {
            Self::Http(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        };
        while let Some(err) = current {
            if err.downcast_ref::<io::Error>().is_some_and(is_out_of_memory) {
                return true;
            }
            current = err.source();
        }
        false
    }

    /// HTTP status of a [`LinkError::Status`] error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "peer did not answer in time"),
            Self::UnexpectedReply(body) => write!(f, "unexpected reply: {:?}", body),
            Self::Status { code, message } => write!(f, "peer answered {}: {}", code, message),
            Self::Http(e) => write!(f, "HTTP error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tokio::time::error::Elapsed> for LinkError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Hub's answer to a registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created(RegistryEntry),
    /// Already registered; use the update path.
    Exists,
    /// Every slot is taken.
    Full,
}

/// Calls one device makes on another.
#[allow(async_fn_in_trait)]
pub trait PeerLink {
    /// `GET /ping`, expecting `pong`.
    async fn ping(&self, peer: Ipv4Addr) -> Result<(), LinkError>;

    /// `GET /status` of a trigger unit.
    async fn status(&self, peer: Ipv4Addr) -> Result<TriggerStatus, LinkError>;

    /// `POST /clack` on a trigger unit.
    async fn fire(&self, peer: Ipv4Addr) -> Result<(), LinkError>;

    /// `GET /register/<mac>`; `None` when the hub does not know `mac`.
    async fn fetch_registration(
        &self,
        hub: Ipv4Addr,
        mac: &str,
    ) -> Result<Option<RegistryEntry>, LinkError>;

    /// `POST /register/<mac>`.
    async fn register(
        &self,
        hub: Ipv4Addr,
        mac: &str,
        registration: &Registration,
    ) -> Result<RegisterOutcome, LinkError>;

    /// `PUT /register/<mac>`.
    async fn update_registration(
        &self,
        hub: Ipv4Addr,
        mac: &str,
        registration: &Registration,
    ) -> Result<RegistryEntry, LinkError>;
}

#[derive(Deserialize)]
struct ErrorDoc {
    message: String,
}

/// [`PeerLink`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPeerLink {
    client: reqwest::Client,
    port: u16,
}

impl HttpPeerLink {
    /// Client for peers serving on `port`. `timeout` bounds each request.
    pub fn new(port: u16, timeout: Duration) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, port })
    }

    fn url(&self, peer: Ipv4Addr, path: &str) -> String {
        format!("http://{}:{}{}", peer, self.port, path)
    }

    async fn error_status(response: reqwest::Response) -> LinkError {
        let code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorDoc>(&body)
            .map(|doc| doc.message)
            .unwrap_or(body);
        LinkError::Status { code, message }
    }

    async fn expect_ok(response: reqwest::Response) -> Result<reqwest::Response, LinkError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_status(response).await)
        }
    }
}

impl PeerLink for HttpPeerLink {
    async fn ping(&self, peer: Ipv4Addr) -> Result<(), LinkError> {
        let response = self.client.get(self.url(peer, "/ping")).send().await?;
        let body = Self::expect_ok(response).await?.text().await?;
        if body.trim() == "pong" {
            Ok(())
        } else {
            Err(LinkError::UnexpectedReply(body))
        }
    }

    async fn status(&self, peer: Ipv4Addr) -> Result<TriggerStatus, LinkError> {
        let response = self.client.get(self.url(peer, "/status")).send().await?;
        Ok(Self::expect_ok(response).await?.json().await?)
    }

    async fn fire(&self, peer: Ipv4Addr) -> Result<(), LinkError> {
        let response = self.client.post(self.url(peer, "/clack")).send().await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn fetch_registration(
        &self,
        hub: Ipv4Addr,
        mac: &str,
    ) -> Result<Option<RegistryEntry>, LinkError> {
        let url = self.url(hub, &format!("/register/{}", mac));
        let response = self.client.get(url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        Ok(Some(Self::expect_ok(response).await?.json().await?))
    }

    async fn register(
        &self,
        hub: Ipv4Addr,
        mac: &str,
        registration: &Registration,
    ) -> Result<RegisterOutcome, LinkError> {
        let url = self.url(hub, &format!("/register/{}", mac));
        let response = self.client.post(url).json(registration).send().await?;
        match response.status().as_u16() {
            403 => Ok(RegisterOutcome::Exists),
            405 => Ok(RegisterOutcome::Full),
            _ => Ok(RegisterOutcome::Created(
                Self::expect_ok(response).await?.json().await?,
            )),
        }
    }

    async fn update_registration(
        &self,
        hub: Ipv4Addr,
        mac: &str,
        registration: &Registration,
    ) -> Result<RegistryEntry, LinkError> {
        let url = self.url(hub, &format!("/register/{}", mac));
        let response = self.client.put(url).json(registration).send().await?;
        Ok(Self::expect_ok(response).await?.json().await?)
    }
}
