//! Wire codecs for finished spans.
//!
//! A batch is shipped as one request body: every span is encoded on its own
//! with [`Encoding::encode`], then [`Encoding::message`] frames the encoded
//! spans into the list form the collector expects for that encoding.

use crate::model::Span;
use crate::Error;
use bytes::Bytes;

mod proto;
mod thrift;

#[cfg(test)]
pub(crate) use proto::ListOfSpans;

/// Wire format used for span bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Encoding {
    /// Binary thrift structs, framed as a thrift list.
    Thrift,
    /// JSON objects, framed as a JSON array.
    Json,
    /// Length-delimited protobuf messages, framed by concatenation.
    Proto3,
}

impl Encoding {
    /// The Content-Type a request body in this encoding is declared as.
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Thrift => "application/x-thrift",
            Encoding::Json => "application/json",
            Encoding::Proto3 => "application/x-protobuf",
        }
    }

    /// Serializes one span.
    ///
    /// Pure and stateless. The same span yields an equivalent record in
    /// every encoding.
    pub fn encode(self, span: &Span) -> Result<EncodedSpan, Error> {
        let bytes = match self {
            Encoding::Json => serde_json::to_vec(span)
                .map_err(|err| Error::Encode(err.to_string()))?,
            Encoding::Thrift => thrift::encode(span)?,
            Encoding::Proto3 => proto::encode(span),
        };
        Ok(EncodedSpan {
            encoding: self,
            bytes: bytes.into(),
        })
    }

    /// Frames already-encoded spans into one request body.
    ///
    /// Only the bytes of each [`EncodedSpan`] are read; the encoding tag
    /// they carry is deliberately ignored so that the body and the declared
    /// Content-Type are both functions of the caller's configuration alone.
    pub fn message(self, batch: &[EncodedSpan]) -> Result<Vec<u8>, Error> {
        let payload: usize = batch.iter().map(|span| span.bytes.len()).sum();
        match self {
            Encoding::Json => {
                let mut body = Vec::with_capacity(payload + batch.len() + 2);
                body.push(b'[');
                for (i, span) in batch.iter().enumerate() {
                    if i > 0 {
                        body.push(b',');
                    }
                    body.extend_from_slice(&span.bytes);
                }
                body.push(b']');
                Ok(body)
            }
            Encoding::Thrift => {
                let mut body = thrift::list_header(batch.len())?;
                body.reserve(payload);
                for span in batch {
                    body.extend_from_slice(&span.bytes);
                }
                Ok(body)
            }
            Encoding::Proto3 => {
                // Each encoded span is already a length-delimited `spans = 1`
                // field, so the list message is the concatenation.
                let mut body = Vec::with_capacity(payload);
                for span in batch {
                    body.extend_from_slice(&span.bytes);
                }
                Ok(body)
            }
        }
    }
}

/// An opaque encoded span, tagged with the encoding that produced it.
///
/// The tag exists so callers can keep encoder and sender configuration in
/// agreement; the sender itself never inspects it.
#[derive(Clone, Debug)]
pub struct EncodedSpan {
    encoding: Encoding,
    bytes: Bytes,
}

impl EncodedSpan {
    /// Wraps raw bytes that were produced elsewhere.
    pub fn new(encoding: Encoding, bytes: impl Into<Bytes>) -> Self {
        EncodedSpan {
            encoding,
            bytes: bytes.into(),
        }
    }

    /// The encoding this span was serialized with.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The serialized bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
