//! Pluggable HTTP transport.
//!
//! The sender talks to collectors through [`HttpClient`] so applications can
//! bring the client that matches their runtime. Implementations for
//! [`reqwest::Client`] and [`reqwest::blocking::Client`] are provided; the
//! blocking client is what the sender constructs by default.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::fmt::Debug;

/// Error produced by an [`HttpClient`] send.
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A minimal interface for posting span batches over HTTP.
///
/// Returns an error if the server cannot be reached or the request could not
/// be completed, e.g. because of a timeout or a loss of connection.
/// Implementations must not share mutable state across calls: concurrent
/// sends carry independent requests.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Send the request and return the full response.
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

#[async_trait]
impl HttpClient for reqwest::Client {
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let request = request.try_into()?;
        let mut response = self.execute(request).await?.error_for_status()?;
        let headers = std::mem::take(response.headers_mut());
        let mut http_response = Response::builder()
            .status(response.status())
            .body(response.bytes().await?)?;
        *http_response.headers_mut() = headers;

        Ok(http_response)
    }
}

#[async_trait]
impl HttpClient for reqwest::blocking::Client {
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let request = request.try_into()?;
        let mut response = self.execute(request)?.error_for_status()?;
        let headers = std::mem::take(response.headers_mut());
        let mut http_response = Response::builder()
            .status(response.status())
            .body(response.bytes()?)?;
        *http_response.headers_mut() = headers;

        Ok(http_response)
    }
}

/// Methods to make working with responses from the [`HttpClient`] trait easier.
pub trait ResponseExt: Sized {
    /// Turn a response into an error if the HTTP status does not indicate success (200 - 299).
    fn error_for_status(self) -> Result<Self, HttpError>;
}

impl<T> ResponseExt for Response<T> {
    fn error_for_status(self) -> Result<Self, HttpError> {
        if self.status().is_success() {
            Ok(self)
        } else {
            Err(format!("request failed with status {}", self.status()).into())
        }
    }
}
