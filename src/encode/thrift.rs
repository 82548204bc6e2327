//! Binary-protocol thrift encoding of a wire span.
//!
//! There is no canonical thrift IDL for this span shape, so the struct uses
//! the wire-model field order (ids 1..13) under the standard binary
//! protocol. Batches are framed as a thrift list of structs: the element
//! type and a big-endian count, followed by the concatenated structs.

use crate::model::{Annotation, Endpoint, Span};
use crate::Error;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use thrift::protocol::{
    TBinaryOutputProtocol, TFieldIdentifier, TListIdentifier, TMapIdentifier, TOutputProtocol,
    TStructIdentifier, TType,
};
use thrift::transport::{ReadHalf, TIoChannel, WriteHalf};

/// Write-only in-memory channel the output protocol renders into.
#[derive(Clone, Debug, Default)]
struct TBufferChannel {
    write_buffer: Arc<Mutex<Vec<u8>>>,
}

impl TBufferChannel {
    fn take_bytes(&self) -> Vec<u8> {
        self.write_buffer
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default()
    }
}

impl TIoChannel for TBufferChannel {
    fn split(self) -> thrift::Result<(ReadHalf<Self>, WriteHalf<Self>)>
    where
        Self: Sized,
    {
        Ok((ReadHalf::new(self.clone()), WriteHalf::new(self)))
    }
}

impl Write for TBufferChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut write_buffer = self
            .write_buffer
            .lock()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
        write_buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for TBufferChannel {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

type Protocol = TBinaryOutputProtocol<WriteHalf<TBufferChannel>>;

fn with_protocol(
    write: impl FnOnce(&mut Protocol) -> thrift::Result<()>,
) -> Result<Vec<u8>, Error> {
    let channel = TBufferChannel::default();
    let (_, write_half) = channel
        .clone()
        .split()
        .map_err(|err| Error::Encode(err.to_string()))?;
    let mut protocol = TBinaryOutputProtocol::new(write_half, true);
    write(&mut protocol).map_err(|err| Error::Encode(err.to_string()))?;
    protocol
        .flush()
        .map_err(|err| Error::Encode(err.to_string()))?;
    Ok(channel.take_bytes())
}

/// Encodes one span as a binary-protocol struct.
pub(crate) fn encode(span: &Span) -> Result<Vec<u8>, Error> {
    with_protocol(|protocol| write_span(protocol, span))
}

/// The list header a batch body starts with.
pub(crate) fn list_header(count: usize) -> Result<Vec<u8>, Error> {
    with_protocol(|protocol| {
        protocol.write_list_begin(&TListIdentifier::new(TType::Struct, count as i32))?;
        protocol.write_list_end()
    })
}

fn field(name: &str, field_type: TType, id: i16) -> TFieldIdentifier {
    TFieldIdentifier::new(name.to_owned(), field_type, id)
}

fn write_string_field(
    protocol: &mut Protocol,
    name: &str,
    id: i16,
    value: &str,
) -> thrift::Result<()> {
    protocol.write_field_begin(&field(name, TType::String, id))?;
    protocol.write_string(value)?;
    protocol.write_field_end()
}

fn write_i64_field(protocol: &mut Protocol, name: &str, id: i16, value: i64) -> thrift::Result<()> {
    protocol.write_field_begin(&field(name, TType::I64, id))?;
    protocol.write_i64(value)?;
    protocol.write_field_end()
}

fn write_bool_field(
    protocol: &mut Protocol,
    name: &str,
    id: i16,
    value: bool,
) -> thrift::Result<()> {
    protocol.write_field_begin(&field(name, TType::Bool, id))?;
    protocol.write_bool(value)?;
    protocol.write_field_end()
}

fn write_span(protocol: &mut Protocol, span: &Span) -> thrift::Result<()> {
    protocol.write_struct_begin(&TStructIdentifier::new("Span".to_owned()))?;
    if let Some(trace_id) = span.trace_id.as_deref() {
        write_string_field(protocol, "trace_id", 1, trace_id)?;
    }
    if let Some(parent_id) = span.parent_id.as_deref() {
        write_string_field(protocol, "parent_id", 2, parent_id)?;
    }
    if let Some(id) = span.id.as_deref() {
        write_string_field(protocol, "id", 3, id)?;
    }
    if let Some(kind) = span.kind {
        protocol.write_field_begin(&field("kind", TType::I32, 4))?;
        protocol.write_i32(crate::encode::proto::SpanKind::from(kind) as i32)?;
        protocol.write_field_end()?;
    }
    if let Some(name) = span.name.as_deref() {
        write_string_field(protocol, "name", 5, name)?;
    }
    if let Some(timestamp) = span.timestamp {
        write_i64_field(protocol, "timestamp", 6, timestamp as i64)?;
    }
    if let Some(duration) = span.duration {
        write_i64_field(protocol, "duration", 7, duration as i64)?;
    }
    if let Some(endpoint) = span.local_endpoint.as_ref() {
        protocol.write_field_begin(&field("local_endpoint", TType::Struct, 8))?;
        write_endpoint(protocol, endpoint)?;
        protocol.write_field_end()?;
    }
    if let Some(endpoint) = span.remote_endpoint.as_ref() {
        protocol.write_field_begin(&field("remote_endpoint", TType::Struct, 9))?;
        write_endpoint(protocol, endpoint)?;
        protocol.write_field_end()?;
    }
    if let Some(annotations) = span.annotations.as_deref() {
        protocol.write_field_begin(&field("annotations", TType::List, 10))?;
        protocol.write_list_begin(&TListIdentifier::new(TType::Struct, annotations.len() as i32))?;
        for annotation in annotations {
            write_annotation(protocol, annotation)?;
        }
        protocol.write_list_end()?;
        protocol.write_field_end()?;
    }
    if let Some(tags) = span.tags.as_ref() {
        protocol.write_field_begin(&field("tags", TType::Map, 11))?;
        protocol.write_map_begin(&TMapIdentifier::new(
            TType::String,
            TType::String,
            tags.len() as i32,
        ))?;
        for (key, value) in tags {
            protocol.write_string(key)?;
            protocol.write_string(value)?;
        }
        protocol.write_map_end()?;
        protocol.write_field_end()?;
    }
    write_bool_field(protocol, "debug", 12, span.debug)?;
    write_bool_field(protocol, "shared", 13, span.shared)?;
    protocol.write_field_stop()?;
    protocol.write_struct_end()
}

fn write_endpoint(protocol: &mut Protocol, endpoint: &Endpoint) -> thrift::Result<()> {
    protocol.write_struct_begin(&TStructIdentifier::new("Endpoint".to_owned()))?;
    if let Some(service_name) = endpoint.service_name.as_deref() {
        write_string_field(protocol, "service_name", 1, service_name)?;
    }
    if let Some(ipv4) = endpoint.ipv4 {
        write_string_field(protocol, "ipv4", 2, &ipv4.to_string())?;
    }
    if let Some(ipv6) = endpoint.ipv6 {
        write_string_field(protocol, "ipv6", 3, &ipv6.to_string())?;
    }
    if let Some(port) = endpoint.port {
        protocol.write_field_begin(&field("port", TType::I32, 4))?;
        protocol.write_i32(i32::from(port))?;
        protocol.write_field_end()?;
    }
    protocol.write_field_stop()?;
    protocol.write_struct_end()
}

fn write_annotation(protocol: &mut Protocol, annotation: &Annotation) -> thrift::Result<()> {
    protocol.write_struct_begin(&TStructIdentifier::new("Annotation".to_owned()))?;
    if let Some(timestamp) = annotation.timestamp {
        write_i64_field(protocol, "timestamp", 1, timestamp as i64)?;
    }
    if let Some(value) = annotation.value.as_deref() {
        write_string_field(protocol, "value", 2, value)?;
    }
    protocol.write_field_stop()?;
    protocol.write_struct_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kind;

    #[test]
    fn list_header_is_type_and_count() {
        let header = list_header(7).unwrap();
        assert_eq!(header[0], 0x0c);
        assert_eq!(&header[1..5], &7i32.to_be_bytes());
        assert_eq!(header.len(), 5);
    }

    #[test]
    fn span_struct_leads_with_first_field() {
        let span = Span::builder()
            .trace_id("000000000000000000000000000000a1".to_owned())
            .id("00000000000000a2".to_owned())
            .kind(Some(Kind::Client))
            .build();
        let bytes = encode(&span).unwrap();

        // field header: type STRING, id 1, then the i32 length of the
        // 32-char trace id.
        assert_eq!(bytes[0], 0x0b);
        assert_eq!(&bytes[1..3], &1i16.to_be_bytes());
        assert_eq!(&bytes[3..7], &32i32.to_be_bytes());
        // struct terminator
        assert_eq!(bytes[bytes.len() - 1], 0x00);
    }

    #[test]
    fn unset_fields_are_not_written() {
        let sparse = encode(&Span::builder().build()).unwrap();
        let full = encode(
            &Span::builder()
                .trace_id("000000000000000000000000000000a1".to_owned())
                .id("00000000000000a2".to_owned())
                .name("get /".to_owned())
                .timestamp(1)
                .duration(1)
                .build(),
        )
        .unwrap();
        assert!(sparse.len() < full.len());
    }
}
