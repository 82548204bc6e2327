//! Translation of in-flight spans into the wire model.
//!
//! A tracer owns a [`MutableSpan`] while the operation runs and hands it to
//! [`SpanHandler::end`] exactly once, together with its read-only
//! [`TraceContext`] and the [`FinishCause`]. The handler is a one-shot
//! transform: nothing is retained between calls, and the only shared state
//! is the downstream [`Reporter`].

use crate::model::{Annotation, Endpoint, Kind, Span};
use crate::report::{self, Reporter};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use typed_builder::TypedBuilder;

const ERROR_TAG: &str = "error";

/// Why a span left the tracer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishCause {
    /// The operation completed normally.
    Finished,
    /// The span was emitted mid-flight, e.g. for a long-running stream.
    /// There is no finish timestamp yet.
    Flushed,
    /// The span was discarded. It must never be reported.
    Abandoned,
}

/// The role a span plays while it is being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanKind {
    /// Initiator of an outgoing call.
    Client,
    /// Handler of an incoming call.
    Server,
    /// Sender of a message to a broker.
    Producer,
    /// Receiver of a message from a broker.
    Consumer,
}

/// Identifiers and sampling flags of a span, fixed at span creation.
#[derive(TypedBuilder, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
    #[builder(setter(strip_option), default)]
    parent_id: Option<u64>,
    #[builder(default = false)]
    sampled: bool,
    #[builder(default = false)]
    sampled_local: bool,
    #[builder(default = false)]
    debug: bool,
}

impl TraceContext {
    /// The trace this span belongs to.
    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    /// This span's id within the trace.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// The parent span's id, unset for a root span.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// Whether this trace was selected for collection.
    pub fn sampled(&self) -> bool {
        self.sampled
    }

    /// Whether a local handler asked for this span regardless of the
    /// trace-level decision.
    pub fn sampled_local(&self) -> bool {
        self.sampled_local
    }

    /// Whether collection is forced regardless of sampling.
    pub fn debug(&self) -> bool {
        self.debug
    }
}

#[derive(Clone, Debug)]
struct RecordedError {
    type_name: &'static str,
}

impl RecordedError {
    fn simple_name(&self) -> &'static str {
        self.type_name.rsplit("::").next().unwrap_or(self.type_name)
    }
}

/// A span under construction, owned by the tracer until `end`.
///
/// Timestamps are microseconds since the epoch; zero means unset.
#[derive(Clone, Debug, Default)]
pub struct MutableSpan {
    name: Option<String>,
    kind: Option<SpanKind>,
    local_service_name: Option<String>,
    local_ip: Option<IpAddr>,
    local_port: Option<u16>,
    remote_service_name: Option<String>,
    remote_ip: Option<IpAddr>,
    remote_port: Option<u16>,
    start_timestamp: u64,
    finish_timestamp: u64,
    tags: Vec<(String, String)>,
    annotations: Vec<(u64, String)>,
    error: Option<RecordedError>,
    shared: bool,
}

impl MutableSpan {
    /// Creates an empty span.
    pub fn new() -> Self {
        MutableSpan::default()
    }

    /// Sets the operation name.
    pub fn name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Sets the span's role.
    pub fn kind(&mut self, kind: SpanKind) {
        self.kind = Some(kind);
    }

    /// Sets the service recording this span.
    pub fn local_service_name(&mut self, name: impl Into<String>) {
        self.local_service_name = Some(name.into());
    }

    /// Parses and records the local IP. Returns false when `ip` is not a
    /// valid address, leaving the span unchanged.
    pub fn local_ip(&mut self, ip: &str) -> bool {
        match ip.parse() {
            Ok(addr) => {
                self.local_ip = Some(addr);
                true
            }
            Err(_) => false,
        }
    }

    /// Sets the local port.
    pub fn local_port(&mut self, port: u16) {
        self.local_port = Some(port);
    }

    /// Sets the peer service name.
    pub fn remote_service_name(&mut self, name: impl Into<String>) {
        self.remote_service_name = Some(name.into());
    }

    /// Parses and records the peer IP and port. Returns false when `ip` is
    /// not a valid address, leaving the span unchanged.
    pub fn remote_ip_and_port(&mut self, ip: &str, port: u16) -> bool {
        match ip.parse() {
            Ok(addr) => {
                self.remote_ip = Some(addr);
                self.remote_port = Some(port);
                true
            }
            Err(_) => false,
        }
    }

    /// Sets the start timestamp in microseconds.
    pub fn start_timestamp(&mut self, timestamp: u64) {
        self.start_timestamp = timestamp;
    }

    /// Sets the finish timestamp in microseconds. Zero means "not finished",
    /// as when a span is flushed mid-flight.
    pub fn finish_timestamp(&mut self, timestamp: u64) {
        self.finish_timestamp = timestamp;
    }

    /// Writes a tag. The last write for a key wins, in place: the entry
    /// keeps the position of the key's first write.
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.tags.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, existing_value)) => *existing_value = value,
            None => self.tags.push((key, value)),
        }
    }

    /// Records a timestamped event.
    pub fn annotate(&mut self, timestamp: u64, value: impl Into<String>) {
        self.annotations.push((timestamp, value.into()));
    }

    /// Records the error that ended this span. Only the error's type is
    /// kept; it backfills the `error` tag unless one was written explicitly.
    pub fn error<E: std::error::Error>(&mut self, _error: &E) {
        self.error = Some(RecordedError {
            type_name: std::any::type_name::<E>(),
        });
    }

    /// Marks this span as started by a remote caller, i.e. it reuses the
    /// caller's span id across the network hop.
    pub fn set_shared(&mut self) {
        self.shared = true;
    }
}

/// Shared no-op handler, returned whenever the reporter is the no-op
/// reporter so that wiring a disabled pipeline costs nothing.
static NOOP_HANDLER: Lazy<Arc<SpanHandler>> = Lazy::new(|| {
    Arc::new(SpanHandler {
        reporter: report::noop_reporter(),
        always_report_spans: false,
    })
});

/// Converts ended spans to the wire model and forwards them to a
/// [`Reporter`].
#[derive(Debug)]
pub struct SpanHandler {
    reporter: Arc<dyn Reporter>,
    always_report_spans: bool,
}

impl SpanHandler {
    /// Creates a handler forwarding to `reporter`.
    ///
    /// When `reporter` is the [`noop_reporter`](crate::noop_reporter)
    /// singleton this returns the shared no-op handler instead of
    /// allocating.
    pub fn create(reporter: Arc<dyn Reporter>) -> Arc<SpanHandler> {
        SpanHandler::builder(reporter).build()
    }

    /// Starts building a handler forwarding to `reporter`.
    pub fn builder(reporter: Arc<dyn Reporter>) -> SpanHandlerBuilder {
        SpanHandlerBuilder {
            reporter,
            always_report_spans: false,
        }
    }

    /// The shared no-op handler.
    pub fn noop() -> Arc<SpanHandler> {
        NOOP_HANDLER.clone()
    }

    /// Accepts a span that left the tracer.
    ///
    /// Abandoned spans and spans of unsampled traces are dropped here;
    /// everything else is translated and handed to the reporter. Each call
    /// is an independent transform over its inputs.
    pub fn end(&self, context: &TraceContext, span: MutableSpan, cause: FinishCause) {
        if cause == FinishCause::Abandoned {
            return;
        }
        if report::is_noop(&self.reporter) {
            return;
        }
        if !context.sampled && !context.sampled_local && !self.always_report_spans {
            return;
        }
        self.reporter.report(convert(context, span));
    }
}

impl PartialEq for SpanHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reporter, &other.reporter)
            && self.always_report_spans == other.always_report_spans
    }
}

impl Eq for SpanHandler {}

impl Hash for SpanHandler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.reporter) as *const ()).hash(state);
        self.always_report_spans.hash(state);
    }
}

/// Configuration for a [`SpanHandler`].
#[derive(Debug)]
pub struct SpanHandlerBuilder {
    reporter: Arc<dyn Reporter>,
    always_report_spans: bool,
}

impl SpanHandlerBuilder {
    /// Report spans even when their trace is unsampled. Useful together
    /// with a reporter that forwards to a secondary aggregation pipeline.
    pub fn always_report_spans(mut self, always: bool) -> Self {
        self.always_report_spans = always;
        self
    }

    /// Builds the handler, collapsing to the shared no-op handler when the
    /// reporter is the no-op singleton.
    pub fn build(self) -> Arc<SpanHandler> {
        if report::is_noop(&self.reporter) && !self.always_report_spans {
            return SpanHandler::noop();
        }
        Arc::new(SpanHandler {
            reporter: self.reporter,
            always_report_spans: self.always_report_spans,
        })
    }
}

/// Maps the recording-side kind onto the wire kind. Fixed table; an unset
/// kind stays unset.
fn into_wire_kind(kind: SpanKind) -> Kind {
    match kind {
        SpanKind::Client => Kind::Client,
        SpanKind::Server => Kind::Server,
        SpanKind::Producer => Kind::Producer,
        SpanKind::Consumer => Kind::Consumer,
    }
}

fn convert(context: &TraceContext, span: MutableSpan) -> Span {
    let MutableSpan {
        name,
        kind,
        local_service_name,
        local_ip,
        local_port,
        remote_service_name,
        remote_ip,
        remote_port,
        start_timestamp,
        finish_timestamp,
        mut tags,
        annotations,
        error,
        shared,
    } = span;

    if let Some(error) = error {
        if !tags.iter().any(|(key, _)| key == ERROR_TAG) {
            tags.push((ERROR_TAG.to_owned(), error.simple_name().to_owned()));
        }
    }

    // A computed zero duration carries no timing information and is left
    // unset; a flushed span (finish == 0) never has a duration.
    let duration = if start_timestamp != 0 && finish_timestamp != 0 {
        finish_timestamp
            .checked_sub(start_timestamp)
            .filter(|duration| *duration > 0)
    } else {
        None
    };

    Span {
        trace_id: Some(format!("{:032x}", context.trace_id)),
        parent_id: context.parent_id.map(|id| format!("{id:016x}")),
        id: Some(format!("{:016x}", context.span_id)),
        kind: kind.map(into_wire_kind),
        name,
        timestamp: (start_timestamp != 0).then_some(start_timestamp),
        duration,
        local_endpoint: Endpoint::from_parts(local_service_name, local_ip, local_port),
        remote_endpoint: Endpoint::from_parts(remote_service_name, remote_ip, remote_port),
        annotations: (!annotations.is_empty()).then(|| {
            annotations
                .into_iter()
                .map(|(timestamp, value)| Annotation {
                    timestamp: Some(timestamp),
                    value: Some(value),
                })
                .collect()
        }),
        tags: (!tags.is_empty()).then(|| tags.into_iter().collect::<IndexMap<_, _>>()),
        debug: context.debug,
        shared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::InMemoryReporter;
    use std::collections::hash_map::DefaultHasher;

    fn context() -> TraceContext {
        TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .sampled(true)
            .build()
    }

    fn handler_over(reporter: &InMemoryReporter) -> Arc<SpanHandler> {
        SpanHandler::create(Arc::new(reporter.clone()))
    }

    const TRACE_ID: &str = "00000000000000000000000000000001";
    const SPAN_ID: &str = "0000000000000002";

    fn base_span() -> Span {
        Span::builder()
            .trace_id(TRACE_ID.to_owned())
            .id(SPAN_ID.to_owned())
            .build()
    }

    #[test]
    fn noop_is_noop() {
        assert!(Arc::ptr_eq(
            &SpanHandler::create(crate::report::noop_reporter()),
            &SpanHandler::noop()
        ));
    }

    #[test]
    fn noop_handler_never_translates() {
        // Reaching end() on the no-op handler returns before any work.
        SpanHandler::noop().end(&context(), MutableSpan::new(), FinishCause::Finished);
    }

    #[test]
    fn equals_and_hash_follow_the_reporter() {
        let reporter: Arc<dyn Reporter> = Arc::new(InMemoryReporter::new());
        let handler = SpanHandler::create(reporter.clone());
        let same = SpanHandler::create(reporter);
        let other = SpanHandler::create(Arc::new(InMemoryReporter::new()));

        assert_eq!(handler, same);
        assert_eq!(hash_of(&handler), hash_of(&same));
        assert_ne!(handler, other);
        assert_ne!(hash_of(&handler), hash_of(&other));
    }

    fn hash_of(handler: &SpanHandler) -> u64 {
        let mut hasher = DefaultHasher::new();
        handler.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn reports_sampled_span() {
        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), MutableSpan::new(), FinishCause::Finished);

        assert_eq!(reporter.finished_spans(), vec![base_span()]);
    }

    #[test]
    fn reports_debug_span() {
        let context = TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .debug(true)
            .sampled(true)
            .build();
        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context, MutableSpan::new(), FinishCause::Finished);

        assert!(reporter.finished_spans()[0].debug);
    }

    #[test]
    fn doesnt_report_unsampled_span() {
        let context = TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .sampled(false)
            .sampled_local(false)
            .build();
        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context, MutableSpan::new(), FinishCause::Finished);

        assert!(reporter.finished_spans().is_empty());
    }

    #[test]
    fn locally_sampled_span_is_reported() {
        let context = TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .sampled(false)
            .sampled_local(true)
            .build();
        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context, MutableSpan::new(), FinishCause::Finished);

        assert_eq!(reporter.finished_spans().len(), 1);
    }

    #[test]
    fn abandoned_doesnt_report() {
        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), MutableSpan::new(), FinishCause::Abandoned);

        assert!(reporter.finished_spans().is_empty());
    }

    #[test]
    fn always_report_spans_reports_unsampled_span() {
        let reporter = InMemoryReporter::new();
        let handler = SpanHandler::builder(Arc::new(reporter.clone()))
            .always_report_spans(true)
            .build();

        let context = TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .sampled(false)
            .sampled_local(false)
            .build();
        handler.end(&context, MutableSpan::new(), FinishCause::Finished);

        assert!(!reporter.finished_spans().is_empty());
    }

    #[test]
    fn equal_start_and_finish_leaves_duration_unset() {
        let mut span = MutableSpan::new();
        span.start_timestamp(1);
        span.finish_timestamp(1);

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        let spans = reporter.finished_spans();
        assert_eq!(spans[0].timestamp, Some(1));
        assert_eq!(spans[0].duration(), None);
    }

    #[test]
    fn replaces_tag() {
        let mut span = MutableSpan::new();
        span.tag("1", "1");
        span.tag("foo", "bar");
        span.tag("2", "2");
        span.tag("foo", "baz");
        span.tag("3", "3");

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        let spans = reporter.finished_spans();
        let tags: Vec<(&str, &str)> = spans[0]
            .tags()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            tags,
            vec![("1", "1"), ("foo", "baz"), ("2", "2"), ("3", "3")]
        );
    }

    #[derive(Debug, thiserror::Error)]
    #[error("broken pipe")]
    struct BrokenPipe;

    #[test]
    fn backfills_error_tag() {
        let mut span = MutableSpan::new();
        span.error(&BrokenPipe);

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        let spans = reporter.finished_spans();
        let tags = spans[0].tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("error").map(String::as_str), Some("BrokenPipe"));
    }

    #[test]
    fn doesnt_overwrite_error_tag() {
        let mut span = MutableSpan::new();
        span.error(&BrokenPipe);
        span.tag("error", "");

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        let spans = reporter.finished_spans();
        let tags = spans[0].tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("error").map(String::as_str), Some(""));
    }

    #[test]
    fn adds_annotations() {
        let mut span = MutableSpan::new();
        span.start_timestamp(1);
        span.annotate(2, "foo");
        span.finish_timestamp(2);

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        let spans = reporter.finished_spans();
        assert_eq!(
            spans[0].annotations().unwrap(),
            &[Annotation::builder().timestamp(2).value("foo".to_owned()).build()]
        );
    }

    #[test]
    fn finished_spans_map_each_kind() {
        for (recorded, wire) in [
            (SpanKind::Client, Kind::Client),
            (SpanKind::Server, Kind::Server),
            (SpanKind::Producer, Kind::Producer),
            (SpanKind::Consumer, Kind::Consumer),
        ] {
            let mut span = MutableSpan::new();
            span.kind(recorded);
            span.start_timestamp(1);
            span.finish_timestamp(2);

            let reporter = InMemoryReporter::new();
            handler_over(&reporter).end(&context(), span, FinishCause::Finished);

            let spans = reporter.finished_spans();
            assert_eq!(spans[0].kind, Some(wire));
            assert_eq!(spans[0].timestamp, Some(1));
            assert_eq!(spans[0].duration(), Some(1));
            assert!(spans[0].annotations().is_none());
        }
    }

    #[test]
    fn flushed_spans_map_each_kind_without_duration() {
        for (recorded, wire) in [
            (SpanKind::Client, Kind::Client),
            (SpanKind::Server, Kind::Server),
            (SpanKind::Producer, Kind::Producer),
            (SpanKind::Consumer, Kind::Consumer),
        ] {
            let mut span = MutableSpan::new();
            span.kind(recorded);
            span.start_timestamp(1);
            span.finish_timestamp(0);

            let reporter = InMemoryReporter::new();
            handler_over(&reporter).end(&context(), span, FinishCause::Flushed);

            let spans = reporter.finished_spans();
            assert_eq!(spans[0].kind, Some(wire));
            assert_eq!(spans[0].timestamp, Some(1));
            assert_eq!(spans[0].duration(), None);
        }
    }

    #[test]
    fn remote_endpoint() {
        let mut span = MutableSpan::new();
        span.kind(SpanKind::Client);
        span.remote_service_name("order-service");
        assert!(span.remote_ip_and_port("1.2.3.4", 80));
        span.start_timestamp(1);
        span.finish_timestamp(2);

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        let spans = reporter.finished_spans();
        assert_eq!(
            spans[0].remote_endpoint,
            Some(
                Endpoint::builder()
                    .service_name("order-service".to_owned())
                    .ipv4("1.2.3.4".parse().unwrap())
                    .port(80)
                    .build()
            )
        );
    }

    #[test]
    fn local_endpoint() {
        let mut span = MutableSpan::new();
        span.local_service_name("checkout");
        assert!(span.local_ip("1.2.3.4"));
        span.local_port(80);

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        let spans = reporter.finished_spans();
        assert_eq!(
            spans[0].local_endpoint,
            Some(
                Endpoint::builder()
                    .service_name("checkout".to_owned())
                    .ipv4("1.2.3.4".parse().unwrap())
                    .port(80)
                    .build()
            )
        );
    }

    #[test]
    fn malformed_ip_is_rejected() {
        let mut span = MutableSpan::new();
        assert!(!span.local_ip("not-an-ip"));
        assert!(!span.remote_ip_and_port("999.0.0.1", 80));

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);
        assert_eq!(reporter.finished_spans(), vec![base_span()]);
    }

    // Keeps the collector from letting the server side of a shared span
    // overwrite the client's start timestamp.
    #[test]
    fn shared_flag_is_copied() {
        let mut span = MutableSpan::new();
        span.set_shared();
        span.start_timestamp(1);
        span.kind(SpanKind::Server);
        span.finish_timestamp(2);

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), span, FinishCause::Finished);

        assert!(reporter.finished_spans()[0].shared);
    }

    #[test]
    fn parent_id_is_carried() {
        let context = TraceContext::builder()
            .trace_id(1)
            .span_id(2)
            .parent_id(3)
            .sampled(true)
            .build();

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context, MutableSpan::new(), FinishCause::Finished);

        assert_eq!(
            reporter.finished_spans()[0].parent_id.as_deref(),
            Some("0000000000000003")
        );
    }

    #[test]
    fn flush_unstarted_sets_neither_timestamp_nor_duration() {
        let mut flushed = MutableSpan::new();
        flushed.finish_timestamp(0);

        let reporter = InMemoryReporter::new();
        handler_over(&reporter).end(&context(), flushed, FinishCause::Flushed);

        let spans = reporter.finished_spans();
        assert_eq!(spans[0].timestamp, None);
        assert_eq!(spans[0].duration(), None);
    }
}
