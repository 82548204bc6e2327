//! Buffering and delivery of translated spans.
//!
//! [`BatchReporter`] accumulates spans on a dedicated worker thread and
//! flushes them through an [`HttpSender`] when the batch is full or the
//! schedule delay elapses. Failed flushes are counted and logged; they are
//! never surfaced to the threads that report spans.

use crate::encode::EncodedSpan;
use crate::model::Span;
use crate::sender::HttpSender;
use crate::{env, Error};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Default maximum queue size.
const DEFAULT_MAX_QUEUE_SIZE: usize = 2_048;
/// Default delay interval between two consecutive deliveries.
const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_millis(5_000);
/// Default maximum batch size.
const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink for translated spans.
///
/// `report` must be safe to call from any number of threads and must not
/// block the caller on network work.
pub trait Reporter: Send + Sync + fmt::Debug {
    /// Accepts one finished span.
    fn report(&self, span: Span);
}

#[derive(Debug)]
struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _span: Span) {}
}

static NOOP: Lazy<Arc<dyn Reporter>> = Lazy::new(|| Arc::new(NoopReporter));

/// The process-wide reporter that discards everything.
///
/// Always returns the same instance, so disabled pipelines can be detected
/// by identity instead of doing work.
pub fn noop_reporter() -> Arc<dyn Reporter> {
    NOOP.clone()
}

pub(crate) fn is_noop(reporter: &Arc<dyn Reporter>) -> bool {
    Arc::ptr_eq(reporter, &NOOP)
}

/// A reporter that stores spans in memory for later inspection.
///
/// Useful in tests and for debugging pipeline wiring.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReporter {
    spans: Arc<Mutex<Vec<Span>>>,
}

impl InMemoryReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        InMemoryReporter::default()
    }

    /// The spans reported so far, in arrival order.
    pub fn finished_spans(&self) -> Vec<Span> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_default()
    }

    /// Discards the recorded spans.
    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl Reporter for InMemoryReporter {
    fn report(&self, span: Span) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span);
        }
    }
}

/// Messages exchanged between reporting threads and the worker.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
enum BatchMessage {
    ReportSpan(Span),
    ForceFlush(SyncSender<Result<(), Error>>),
    Shutdown(SyncSender<Result<(), Error>>),
}

/// A [`Reporter`] that batches spans and delivers them through an
/// [`HttpSender`] from a dedicated background thread.
///
/// Spans are encoded with the sender's configured encoding at flush time. A
/// full queue drops the incoming span rather than blocking the reporting
/// thread; drops and failed deliveries both show up in
/// [`dropped_spans`](BatchReporter::dropped_spans).
#[derive(Debug)]
pub struct BatchReporter {
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped_span_count: Arc<AtomicUsize>,
}

impl BatchReporter {
    /// Starts building a batch reporter that delivers through `sender`.
    pub fn builder(sender: HttpSender) -> BatchReporterBuilder {
        BatchReporterBuilder {
            sender,
            config: BatchConfig::default(),
        }
    }

    fn new(sender: HttpSender, config: BatchConfig) -> Result<BatchReporter, Error> {
        let (message_sender, message_receiver) = sync_channel(config.max_queue_size);
        let dropped_span_count = Arc::new(AtomicUsize::new(0));
        let dropped = dropped_span_count.clone();

        let handle = thread::Builder::new()
            .name("span-relay-batch-worker".to_string())
            .spawn(move || {
                let mut batch: Vec<Span> = Vec::with_capacity(config.max_export_batch_size);
                let mut last_export = Instant::now();

                let flush = |batch: &mut Vec<Span>, dropped: &AtomicUsize| -> Result<(), Error> {
                    if batch.is_empty() {
                        return Ok(());
                    }
                    let spans = batch.split_off(0);
                    let count = spans.len();
                    let encoded: Vec<EncodedSpan> = spans
                        .iter()
                        .filter_map(|span| match sender.encoding().encode(span) {
                            Ok(encoded) => Some(encoded),
                            Err(err) => {
                                dropped.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(error = %err, "dropping unencodable span");
                                None
                            }
                        })
                        .collect();
                    match futures_executor::block_on(sender.send_spans(encoded)) {
                        Ok(()) => Ok(()),
                        Err(err) => {
                            dropped.fetch_add(count, Ordering::Relaxed);
                            tracing::warn!(
                                spans = count,
                                error = %err,
                                "batch delivery failed, spans dropped"
                            );
                            Err(err)
                        }
                    }
                };

                loop {
                    let timeout = config
                        .scheduled_delay
                        .saturating_sub(last_export.elapsed());
                    match message_receiver.recv_timeout(timeout) {
                        Ok(BatchMessage::ReportSpan(span)) => {
                            batch.push(span);
                            if batch.len() >= config.max_export_batch_size {
                                let _ = flush(&mut batch, &dropped);
                                last_export = Instant::now();
                            }
                        }
                        Ok(BatchMessage::ForceFlush(result_sender)) => {
                            let _ = result_sender.send(flush(&mut batch, &dropped));
                            last_export = Instant::now();
                        }
                        Ok(BatchMessage::Shutdown(result_sender)) => {
                            let _ = result_sender.send(flush(&mut batch, &dropped));
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let _ = flush(&mut batch, &dropped);
                            last_export = Instant::now();
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            let _ = flush(&mut batch, &dropped);
                            break;
                        }
                    }
                }
            })
            .map_err(|err| Error::Other(format!("failed to spawn batch worker: {err}")))?;

        Ok(BatchReporter {
            message_sender,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            dropped_span_count,
        })
    }

    /// Spans lost so far: queue overflows plus spans in failed deliveries.
    pub fn dropped_spans(&self) -> usize {
        self.dropped_span_count.load(Ordering::Relaxed)
    }

    /// Delivers everything currently buffered and returns the outcome.
    pub fn force_flush(&self) -> Result<(), Error> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(Error::Other("reporter already shut down".into()));
        }
        let (result_sender, result_receiver) = sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::ForceFlush(result_sender))
            .map_err(|_| Error::Other("failed to enqueue flush".into()))?;
        result_receiver
            .recv_timeout(CONTROL_TIMEOUT)
            .map_err(|_| Error::ExportTimedOut(CONTROL_TIMEOUT))?
    }

    /// Flushes the remaining spans and stops the worker thread.
    ///
    /// Later calls return an error; spans reported after shutdown are
    /// counted as dropped.
    pub fn shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(Error::Other("reporter already shut down".into()));
        }
        let (result_sender, result_receiver) = sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::Shutdown(result_sender))
            .map_err(|_| Error::Other("failed to enqueue shutdown".into()))?;
        let result = result_receiver
            .recv_timeout(CONTROL_TIMEOUT)
            .map_err(|_| Error::ExportTimedOut(CONTROL_TIMEOUT))?;
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(worker) = handle.take() {
                let _ = worker.join();
            }
        }
        result
    }
}

impl Reporter for BatchReporter {
    fn report(&self, span: Span) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.dropped_span_count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self
            .message_sender
            .try_send(BatchMessage::ReportSpan(span))
            .is_err()
        {
            // Warn on the first drop only; steady-state overflow would
            // otherwise flood the log.
            if self.dropped_span_count.fetch_add(1, Ordering::Relaxed) == 0 {
                tracing::warn!(
                    "span queue full, dropping spans until the worker catches up"
                );
            }
        }
    }
}

impl Drop for BatchReporter {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown();
        }
    }
}

/// Builder for a [`BatchReporter`].
#[derive(Debug)]
pub struct BatchReporterBuilder {
    sender: HttpSender,
    config: BatchConfig,
}

impl BatchReporterBuilder {
    /// Replaces the batching configuration.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts the worker thread and returns the reporter.
    pub fn build(self) -> Result<BatchReporter, Error> {
        BatchReporter::new(self.sender, self.config)
    }
}

/// Batching policy for a [`BatchReporter`].
///
/// Use [`BatchConfigBuilder`] to tune it; the default reads the
/// `SPAN_RELAY_MAX_QUEUE_SIZE`, `SPAN_RELAY_SCHEDULE_DELAY` and
/// `SPAN_RELAY_MAX_EXPORT_BATCH_SIZE` environment variables.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
}

impl Default for BatchConfigBuilder {
    /// Defaults, overridden by the `SPAN_RELAY_*` environment variables
    /// when set.
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: env::get_usize(env::ENV_MAX_QUEUE_SIZE, DEFAULT_MAX_QUEUE_SIZE),
            scheduled_delay: env::get_duration_millis(
                env::ENV_SCHEDULE_DELAY,
                DEFAULT_SCHEDULE_DELAY,
            ),
            max_export_batch_size: env::get_usize(
                env::ENV_MAX_EXPORT_BATCH_SIZE,
                DEFAULT_MAX_EXPORT_BATCH_SIZE,
            ),
        }
    }
}

impl BatchConfigBuilder {
    /// Maximum number of spans buffered before new spans are dropped.
    /// Defaults to 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Delay between two consecutive deliveries when the batch does not
    /// fill up first. Defaults to 5 seconds.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Number of buffered spans that triggers an immediate delivery.
    /// Defaults to 512.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> BatchConfig {
        BatchConfig {
            max_queue_size: self.max_queue_size.max(1),
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size: self.max_export_batch_size.clamp(1, self.max_queue_size.max(1)),
        }
    }
}
