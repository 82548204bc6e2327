//! Hand-maintained prost mirror of the wire span model.
//!
//! Field numbers are part of the wire contract and must not be reordered.
//! A span is encoded as a length-delimited `spans = 1` field so that a
//! batch body is the concatenation of its members, readable as one
//! `ListOfSpans` message.

use crate::model;
use prost::Message;
use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct Span {
    #[prost(string, tag = "1")]
    pub(crate) trace_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub(crate) parent_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub(crate) id: ::prost::alloc::string::String,
    #[prost(enumeration = "SpanKind", tag = "4")]
    pub(crate) kind: i32,
    #[prost(string, tag = "5")]
    pub(crate) name: ::prost::alloc::string::String,
    #[prost(fixed64, tag = "6")]
    pub(crate) timestamp: u64,
    #[prost(uint64, tag = "7")]
    pub(crate) duration: u64,
    #[prost(message, optional, tag = "8")]
    pub(crate) local_endpoint: ::core::option::Option<Endpoint>,
    #[prost(message, optional, tag = "9")]
    pub(crate) remote_endpoint: ::core::option::Option<Endpoint>,
    #[prost(message, repeated, tag = "10")]
    pub(crate) annotations: ::prost::alloc::vec::Vec<Annotation>,
    #[prost(map = "string, string", tag = "11")]
    pub(crate) tags: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
    #[prost(bool, tag = "12")]
    pub(crate) debug: bool,
    #[prost(bool, tag = "13")]
    pub(crate) shared: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct Endpoint {
    #[prost(string, tag = "1")]
    pub(crate) service_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub(crate) ipv4: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub(crate) ipv6: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub(crate) port: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct Annotation {
    #[prost(fixed64, tag = "1")]
    pub(crate) timestamp: u64,
    #[prost(string, tag = "2")]
    pub(crate) value: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub(crate) enum SpanKind {
    Unspecified = 0,
    Client = 1,
    Server = 2,
    Producer = 3,
    Consumer = 4,
}

/// A batch body: what the concatenated length-delimited spans decode as.
#[cfg(test)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ListOfSpans {
    #[prost(message, repeated, tag = "1")]
    pub(crate) spans: ::prost::alloc::vec::Vec<Span>,
}

/// Encodes one span as a length-delimited `spans = 1` field.
pub(crate) fn encode(span: &model::Span) -> Vec<u8> {
    let message = Span::from(span);
    let mut buf = Vec::with_capacity(message.encoded_len() + 4);
    prost::encoding::message::encode(1u32, &message, &mut buf);
    buf
}

impl From<&model::Span> for Span {
    fn from(span: &model::Span) -> Self {
        Span {
            trace_id: span.trace_id.clone().unwrap_or_default(),
            parent_id: span.parent_id.clone().unwrap_or_default(),
            id: span.id.clone().unwrap_or_default(),
            kind: span.kind.map(SpanKind::from).unwrap_or(SpanKind::Unspecified) as i32,
            name: span.name.clone().unwrap_or_default(),
            timestamp: span.timestamp.unwrap_or_default(),
            duration: span.duration.unwrap_or_default(),
            local_endpoint: span.local_endpoint.as_ref().map(Endpoint::from),
            remote_endpoint: span.remote_endpoint.as_ref().map(Endpoint::from),
            annotations: span
                .annotations
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(Annotation::from)
                .collect(),
            tags: span
                .tags
                .as_ref()
                .map(|tags| {
                    tags.iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            debug: span.debug,
            shared: span.shared,
        }
    }
}

impl From<model::Kind> for SpanKind {
    fn from(kind: model::Kind) -> Self {
        match kind {
            model::Kind::Client => SpanKind::Client,
            model::Kind::Server => SpanKind::Server,
            model::Kind::Producer => SpanKind::Producer,
            model::Kind::Consumer => SpanKind::Consumer,
        }
    }
}

impl From<&model::Endpoint> for Endpoint {
    fn from(endpoint: &model::Endpoint) -> Self {
        Endpoint {
            service_name: endpoint.service_name.clone().unwrap_or_default(),
            ipv4: endpoint.ipv4.map(|ip| ip.to_string()).unwrap_or_default(),
            ipv6: endpoint.ipv6.map(|ip| ip.to_string()).unwrap_or_default(),
            port: endpoint.port.map(i32::from).unwrap_or_default(),
        }
    }
}

impl From<&model::Annotation> for Annotation {
    fn from(annotation: &model::Annotation) -> Self {
        Annotation {
            timestamp: annotation.timestamp.unwrap_or_default(),
            value: annotation.value.clone().unwrap_or_default(),
        }
    }
}
