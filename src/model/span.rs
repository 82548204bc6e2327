use crate::model::{annotation::Annotation, endpoint::Endpoint};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// The span's role in an RPC or messaging exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    /// Initiator of an outgoing call.
    Client,
    /// Handler of an incoming call.
    Server,
    /// Sender of a message to a broker.
    Producer,
    /// Receiver of a message from a broker.
    Consumer,
}

/// An immutable, finished span in the shape collectors ingest.
///
/// Timestamps and durations are microseconds. A present `duration` is always
/// at least 1; a computed zero duration is left unset rather than reported.
/// Tags preserve the order in which keys were first written.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) trace_id: Option<String>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_id: Option<String>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) kind: Option<Kind>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) timestamp: Option<u64>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) duration: Option<u64>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) local_endpoint: Option<Endpoint>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) remote_endpoint: Option<Endpoint>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) annotations: Option<Vec<Annotation>>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tags: Option<IndexMap<String, String>>,
    #[builder(default = false)]
    #[serde(default)]
    pub(crate) debug: bool,
    #[builder(default = false)]
    #[serde(default)]
    pub(crate) shared: bool,
}

impl Span {
    /// Microsecond duration, when timing data was available.
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    /// Tags in first-written key order.
    pub fn tags(&self) -> Option<&IndexMap<String, String>> {
        self.tags.as_ref()
    }

    /// Annotations in the order they were recorded.
    pub fn annotations(&self) -> Option<&[Annotation]> {
        self.annotations.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::annotation::Annotation;
    use crate::model::endpoint::Endpoint;
    use crate::model::span::{Kind, Span};
    use indexmap::IndexMap;
    use std::net::Ipv4Addr;

    #[test]
    fn test_empty() {
        test_json_serialization(
            Span::builder().build(),
            "{\"debug\":false,\"shared\":false}",
        );
    }

    #[test]
    fn test_full_span() {
        let mut tags = IndexMap::new();
        tags.insert("a".to_owned(), "b".to_owned());
        test_json_serialization(
            Span::builder()
                .trace_id("4e441824ec2b6a44ffdc9bb9a6453df3".to_owned())
                .parent_id("ffdc9bb9a6453df3".to_owned())
                .id("efdc9cd9a1849df3".to_owned())
                .kind(Some(Kind::Server))
                .name("main".to_owned())
                .timestamp(1_502_787_600_000_000)
                .duration(150_000)
                .local_endpoint(
                    Endpoint::builder()
                        .service_name("backend".to_owned())
                        .ipv4(Ipv4Addr::new(192, 168, 0, 1))
                        .port(8080)
                        .build(),
                )
                .remote_endpoint(
                    Endpoint::builder()
                        .service_name("frontend".to_owned())
                        .ipv4(Ipv4Addr::new(127, 0, 0, 1))
                        .port(8080)
                        .build(),
                )
                .annotations(vec![Annotation::builder()
                    .timestamp(1_502_780_000_000_000)
                    .value("interesting event".to_string())
                    .build()])
                .tags(tags)
                .build(),
            "{\"traceId\":\"4e441824ec2b6a44ffdc9bb9a6453df3\",\
             \"parentId\":\"ffdc9bb9a6453df3\",\
             \"id\":\"efdc9cd9a1849df3\",\
             \"kind\":\"SERVER\",\
             \"name\":\"main\",\
             \"timestamp\":1502787600000000,\
             \"duration\":150000,\
             \"localEndpoint\":{\"serviceName\":\"backend\",\"ipv4\":\"192.168.0.1\",\"port\":8080},\
             \"remoteEndpoint\":{\"serviceName\":\"frontend\",\"ipv4\":\"127.0.0.1\",\"port\":8080},\
             \"annotations\":[{\"timestamp\":1502780000000000,\"value\":\"interesting event\"}],\
             \"tags\":{\"a\":\"b\"},\
             \"debug\":false,\
             \"shared\":false}",
        );
    }

    #[test]
    fn test_json_round_trip() {
        let span = Span::builder()
            .trace_id("4e441824ec2b6a44ffdc9bb9a6453df3".to_owned())
            .id("efdc9cd9a1849df3".to_owned())
            .kind(Some(Kind::Client))
            .timestamp(1)
            .build();

        let json = serde_json::to_string(&span).unwrap();
        let read_back: Span = serde_json::from_str(&json).unwrap();
        assert_eq!(read_back, span);
    }

    fn test_json_serialization(span: Span, desired: &str) {
        let result = serde_json::to_string(&span).unwrap();
        assert_eq!(result, desired.to_owned());
    }
}
