//! Immutable wire representation of a finished span.
//!
//! Values of these types are what a [`Reporter`](crate::Reporter) receives
//! and what the [`Encoding`](crate::Encoding) codecs serialize. They are
//! built once by the span handler and never mutated afterwards.

pub(crate) mod annotation;
pub(crate) mod endpoint;
pub(crate) mod span;

pub use annotation::Annotation;
pub use endpoint::Endpoint;
pub use span::{Kind, Span};
