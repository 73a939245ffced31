//! Request body sources (`spec.md` §3 "body source").

use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;

use crate::error::BoxError;
use crate::http1::multipart::Multipart;

/// A stream of body chunks with an unknown total size.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// The source a request body is drawn from (`spec.md` §3/§4.4).
pub enum BodySource {
    /// No body at all.
    None,
    /// A fully-known, in-memory body; framed with `Content-Length`.
    Bytes(Bytes),
    /// A lazily-produced stream of unknown total size; framed chunked.
    Stream(ByteStream),
    /// A multipart/form-data body; size is known once assembled unless it
    /// contains a streamed file part.
    Multipart(Multipart),
}

impl BodySource {
    /// The `Content-Length` to advertise, if the size is known upfront.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            BodySource::None => Some(0),
            BodySource::Bytes(b) => Some(b.len() as u64),
            BodySource::Stream(_) => None,
            BodySource::Multipart(m) => m.known_length(),
        }
    }

    /// True if this body source has no content at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, BodySource::None)
    }
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodySource::None => f.write_str("BodySource::None"),
            BodySource::Bytes(b) => write!(f, "BodySource::Bytes({} bytes)", b.len()),
            BodySource::Stream(_) => f.write_str("BodySource::Stream(..)"),
            BodySource::Multipart(_) => f.write_str("BodySource::Multipart(..)"),
        }
    }
}
