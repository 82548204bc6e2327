//! # span-relay
//!
//! Batching span reporter with pluggable encoding and HTTP transport.
//!
//! The crate covers the delivery half of a tracing system: a tracer records
//! a [`MutableSpan`] while an operation runs, and hands it to a
//! [`SpanHandler`] when it ends. The handler translates it into the
//! immutable wire [`Span`], a [`Reporter`] buffers the result, and an
//! [`HttpSender`] ships encoded batches to a collector endpoint.
//!
//! ## Quickstart
//!
//! ```no_run
//! use span_relay::{
//!     BatchReporter, FinishCause, HttpSender, MutableSpan, SpanHandler, SpanKind, TraceContext,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), span_relay::Error> {
//!     let sender = HttpSender::create("http://localhost:9411/api/v2/spans")?;
//!     let reporter = Arc::new(BatchReporter::builder(sender).build()?);
//!     let handler = SpanHandler::create(reporter.clone());
//!
//!     // Normally driven by a tracer; spelled out here for illustration.
//!     let context = TraceContext::builder()
//!         .trace_id(0x4e44_1824)
//!         .span_id(0x2)
//!         .sampled(true)
//!         .build();
//!     let mut span = MutableSpan::new();
//!     span.name("get /users");
//!     span.kind(SpanKind::Server);
//!     span.start_timestamp(1_502_787_600_000_000);
//!     span.finish_timestamp(1_502_787_600_000_200);
//!     handler.end(&context, span, FinishCause::Finished);
//!
//!     reporter.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Encodings
//!
//! Batches are shipped in one of three encodings, selected on the sender;
//! the declared Content-Type always follows that selection, never the bytes
//! themselves. See [`Encoding`].
#![warn(missing_docs, unreachable_pub)]

mod client;
mod encode;
mod env;
mod handler;
mod model;
mod report;
mod sender;

pub use client::{HttpClient, HttpError, ResponseExt};
pub use encode::{EncodedSpan, Encoding};
pub use handler::{
    FinishCause, MutableSpan, SpanHandler, SpanHandlerBuilder, SpanKind, TraceContext,
};
pub use model::{Annotation, Endpoint, Kind, Span};
pub use report::{
    noop_reporter, BatchConfig, BatchConfigBuilder, BatchReporter, BatchReporterBuilder,
    InMemoryReporter, Reporter,
};
pub use sender::{Health, HttpSender, HttpSenderBuilder};

/// Errors surfaced by this crate.
///
/// Configuration mistakes fail fast when a sender is built; everything that
/// happens on the wire is only ever delivered through the send result and
/// never panics or leaks into later calls.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The endpoint URL's protocol scheme is not one the transport speaks.
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// The endpoint could not be parsed as a URI at all.
    #[error("invalid endpoint uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// Building the HTTP request failed.
    #[error("http request failed with {0}")]
    RequestFailed(#[from] http::Error),

    /// The batch did not reach the collector: connection failure, non-2xx
    /// response, or disconnect mid-body.
    #[error("span delivery failed: {0}")]
    Transport(String),

    /// Compressing a request body failed.
    #[error("gzip compression failed: {0}")]
    Compression(#[from] std::io::Error),

    /// Serializing a span failed.
    #[error("span encoding failed: {0}")]
    Encode(String),

    /// The bundled HTTP client could not be constructed.
    #[error("http client construction failed: {0}")]
    Client(String),

    /// A flush or shutdown did not complete within its deadline.
    #[error("span export timed out after {0:?}")]
    ExportTimedOut(std::time::Duration),

    /// Other errors.
    #[error("{0}")]
    Other(String),
}
