//! HTTP delivery of encoded span batches.

use crate::client::{HttpClient, ResponseExt};
use crate::encode::{EncodedSpan, Encoding};
use crate::{env, Error};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::{
    header::{CONTENT_ENCODING, CONTENT_TYPE},
    Method, Request, Uri,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Outcome of a connectivity probe, see [`HttpSender::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Health {
    /// Whether the collector accepted the probe.
    pub ok: bool,
    /// Description of the failure when `ok` is false.
    pub error: Option<String>,
}

impl Health {
    fn up() -> Self {
        Health {
            ok: true,
            error: None,
        }
    }

    fn down(error: impl Into<String>) -> Self {
        Health {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Sends encoded span batches to a collector endpoint over HTTP.
///
/// A sender is immutable: reconfiguring goes through [`HttpSender::to_builder`]
/// and produces a new sender, leaving the original untouched. Calls do not
/// share mutable request state, so one sender may be used from any number of
/// threads.
///
/// The declared Content-Type is always derived from the configured
/// [`Encoding`], never from the bytes handed to [`send_spans`]: feeding it
/// spans encoded differently than configured is a configuration bug this
/// type deliberately does not detect.
///
/// [`send_spans`]: HttpSender::send_spans
#[derive(Clone, Debug)]
pub struct HttpSender {
    endpoint: Uri,
    encoding: Encoding,
    compression_enabled: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    client: Arc<dyn HttpClient>,
}

impl HttpSender {
    /// Creates a sender for `endpoint` with default configuration.
    ///
    /// Fails fast with [`Error::UnsupportedScheme`] when the endpoint's
    /// scheme is not http or https; a send is never attempted against an
    /// unusable endpoint.
    pub fn create(endpoint: impl Into<String>) -> Result<HttpSender, Error> {
        HttpSender::builder(endpoint).build()
    }

    /// Creates a sender configured from `SPAN_RELAY_ENDPOINT` and
    /// `SPAN_RELAY_TIMEOUT`.
    pub fn from_env() -> Result<HttpSender, Error> {
        HttpSender::builder(env::get_endpoint())
            .read_timeout(env::get_timeout())
            .build()
    }

    /// Starts building a sender for `endpoint`.
    pub fn builder(endpoint: impl Into<String>) -> HttpSenderBuilder {
        HttpSenderBuilder {
            endpoint: endpoint.into(),
            encoding: Encoding::Thrift,
            compression_enabled: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: env::DEFAULT_TIMEOUT,
            client: None,
        }
    }

    /// Reconfigures into a new builder carrying this sender's settings.
    pub fn to_builder(&self) -> HttpSenderBuilder {
        HttpSenderBuilder {
            endpoint: self.endpoint.to_string(),
            encoding: self.encoding,
            compression_enabled: self.compression_enabled,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            client: Some(self.client.clone()),
        }
    }

    /// The encoding batches are framed and declared as.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The collector endpoint batches are posted to.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// Posts one batch of already-encoded spans in a single request.
    ///
    /// Exactly one outcome is produced per call: `Ok` after the collector
    /// accepted the batch, `Err` for every transport failure (connection
    /// refused or reset, non-2xx status, disconnect mid-body). Failures are
    /// never panics and never corrupt the sender for later calls.
    pub async fn send_spans(&self, spans: Vec<EncodedSpan>) -> Result<(), Error> {
        let count = spans.len();
        let body = self.encoding.message(&spans)?;
        let body = if self.compression_enabled {
            gzip(&body)?
        } else {
            body
        };

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, self.encoding.content_type());
        if self.compression_enabled {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        let request = request.body(Bytes::from(body))?;

        self.client
            .send_bytes(request)
            .await
            .map_err(|err| Error::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| Error::Transport(err.to_string()))?;
        tracing::debug!(spans = count, endpoint = %self.endpoint, "batch accepted");
        Ok(())
    }

    /// Blocking form of [`send_spans`]: returns only once the outcome is
    /// known. This is the default invocation mode; it requires a client that
    /// completes without an external reactor, such as the bundled
    /// [`reqwest::blocking::Client`].
    ///
    /// [`send_spans`]: HttpSender::send_spans
    pub fn send_spans_blocking(&self, spans: Vec<EncodedSpan>) -> Result<(), Error> {
        futures_executor::block_on(self.send_spans(spans))
    }

    /// Probes the endpoint with an empty batch.
    ///
    /// Runs on its own request, independent of in-flight sends, and turns
    /// every failure into `ok == false` instead of an error.
    pub async fn check(&self) -> Health {
        match self.send_spans(Vec::new()).await {
            Ok(()) => Health::up(),
            Err(err) => {
                tracing::debug!(endpoint = %self.endpoint, error = %err, "health probe failed");
                Health::down(err.to_string())
            }
        }
    }

    /// Blocking form of [`check`](HttpSender::check).
    pub fn check_blocking(&self) -> Health {
        futures_executor::block_on(self.check())
    }
}

/// Configuration for an [`HttpSender`], applied on [`build`](Self::build).
#[derive(Debug)]
pub struct HttpSenderBuilder {
    endpoint: String,
    encoding: Encoding,
    compression_enabled: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    client: Option<Arc<dyn HttpClient>>,
}

impl HttpSenderBuilder {
    /// Replaces the collector endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Selects the wire encoding. Defaults to [`Encoding::Thrift`].
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Toggles gzip compression of request bodies. Defaults to enabled.
    pub fn compression_enabled(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }

    /// Maximum time to establish a connection. Only applies to the bundled
    /// default client.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Maximum time for one request round trip. Only applies to the bundled
    /// default client.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Brings a custom transport instead of the bundled blocking client.
    ///
    /// Make sure the client works with the runtime the sender is driven
    /// from: the bundled blocking client needs no reactor, an async client
    /// does.
    pub fn http_client<T: HttpClient + 'static>(mut self, client: T) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Validates the endpoint and builds an immutable sender.
    pub fn build(self) -> Result<HttpSender, Error> {
        let endpoint: Uri = self.endpoint.parse()?;
        let scheme = endpoint.scheme_str().unwrap_or("");
        if !matches!(scheme, "http" | "https") {
            return Err(Error::UnsupportedScheme(scheme.to_owned()));
        }

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(
                reqwest::blocking::Client::builder()
                    .connect_timeout(self.connect_timeout)
                    .timeout(self.read_timeout)
                    .build()
                    .map_err(|err| Error::Client(err.to_string()))?,
            ),
        };

        Ok(HttpSender {
            endpoint,
            encoding: self.encoding,
            compression_enabled: self.compression_enabled,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            client,
        })
    }
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2 + 16), Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}
