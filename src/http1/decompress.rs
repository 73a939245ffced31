//! Streaming response decompression (`spec.md` §4.4 "Content-Encoding").

use futures_util::StreamExt;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::error::{BoxError, Error};
use crate::http1::body::ByteStream;

/// A content-coding this engine knows how to decode on the fly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    #[cfg(feature = "gzip")]
    Gzip,
    #[cfg(feature = "deflate")]
    Deflate,
}

impl ContentEncoding {
    /// Parses a raw `Content-Encoding` header value. Unknown or
    /// feature-disabled codings return `None`, leaving the body untouched
    /// and the raw header intact for the caller to observe
    /// (`spec.md` §4.4: "the raw `Content-Encoding` header is preserved
    /// verbatim").
    pub fn parse(raw: &str) -> Option<ContentEncoding> {
        match raw.trim() {
            #[cfg(feature = "gzip")]
            "gzip" | "x-gzip" => Some(ContentEncoding::Gzip),
            #[cfg(feature = "deflate")]
            "deflate" => Some(ContentEncoding::Deflate),
            _ => None,
        }
    }
}

/// Wraps `body` with a streaming decoder for `encoding`.
///
/// The stream is adapted through [`StreamReader`]/[`ReaderStream`] so the
/// byte-oriented `async-compression` decoders can sit directly on top of
/// our chunk-oriented body stream without buffering the whole response.
pub fn decode_stream(encoding: ContentEncoding, body: ByteStream) -> ByteStream {
    let io_stream = body.map(|r| r.map_err(std::io::Error::other));
    let reader = StreamReader::new(io_stream);

    match encoding {
        #[cfg(feature = "gzip")]
        ContentEncoding::Gzip => {
            let decoder = async_compression::tokio::bufread::GzipDecoder::new(reader);
            Box::pin(ReaderStream::new(decoder).map(map_decode_error))
        }
        #[cfg(feature = "deflate")]
        ContentEncoding::Deflate => {
            let decoder = async_compression::tokio::bufread::ZlibDecoder::new(reader);
            Box::pin(ReaderStream::new(decoder).map(map_decode_error))
        }
    }
}

fn map_decode_error(r: std::io::Result<bytes::Bytes>) -> Result<bytes::Bytes, BoxError> {
    r.map_err(|e| Box::new(Error::decompression(e)) as BoxError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_known_codings() {
        #[cfg(feature = "gzip")]
        assert_eq!(ContentEncoding::parse("gzip"), Some(ContentEncoding::Gzip));
        #[cfg(feature = "deflate")]
        assert_eq!(ContentEncoding::parse("deflate"), Some(ContentEncoding::Deflate));
        assert_eq!(ContentEncoding::parse("br"), None);
    }

    #[tokio::test]
    #[cfg(feature = "gzip")]
    async fn decodes_gzip_stream_to_original_bytes() {
        use async_compression::tokio::write::GzipEncoder;
        use tokio::io::AsyncWriteExt;

        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(b"Hello, world").await.unwrap();
        encoder.shutdown().await.unwrap();
        let gz_bytes = encoder.into_inner();

        let source: ByteStream = Box::pin(futures_util::stream::once(async move {
            Ok::<_, BoxError>(bytes::Bytes::from(gz_bytes))
        }));
        let mut decoded = decode_stream(ContentEncoding::Gzip, source);

        let mut out = Vec::new();
        while let Some(chunk) = decoded.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, b"Hello, world");
    }
}
