//! `multipart/form-data` body assembly (RFC 7578, `spec.md` §4.4/§6).

use bytes::Bytes;
use rand::Rng;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::http1::body::ByteStream;

const BOUNDARY_CHARS: &[u8] = b"0123456789abcdef";

/// Generates a random 32-hex-character boundary token.
///
/// `spec.md` §4.4 requires the boundary not collide with any payload byte
/// sequence; 128 bits of randomness makes an accidental collision with
/// user-supplied content negligible, matching common practice (the
/// teacher's body composer uses the same size class of random token for
/// multipart boundaries and WS masking keys).
pub fn generate_boundary() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| BOUNDARY_CHARS[rng.gen_range(0..16)] as char)
        .collect()
}

enum PartData {
    Bytes(Bytes),
    Stream(ByteStream),
}

/// One part of a multipart body.
pub struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: PartData,
}

impl Part {
    /// A part with an in-memory value.
    pub fn text(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: PartData::Bytes(value.into()),
        }
    }

    /// A file part streamed from `stream` without preloading it into
    /// memory (`spec.md` §4.4: "Large file parts are streamed as chunks
    /// without preloading").
    pub fn file_stream(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        stream: ByteStream,
    ) -> Self {
        Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data: PartData::Stream(stream),
        }
    }

    fn header_block(&self) -> String {
        let mut header = format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape_quotes(&self.name)
        );
        if let Some(filename) = &self.filename {
            header.push_str(&format!("; filename=\"{}\"", escape_quotes(filename)));
        }
        header.push_str("\r\n");
        if let Some(ct) = &self.content_type {
            header.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        header.push_str("\r\n");
        header
    }

    fn known_length(&self) -> Option<u64> {
        match &self.data {
            PartData::Bytes(b) => Some(b.len() as u64),
            PartData::Stream(_) => None,
        }
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// A `multipart/form-data` body under construction.
pub struct Multipart {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

impl Multipart {
    /// Starts an empty multipart body with a fresh random boundary.
    pub fn new() -> Self {
        Multipart {
            boundary: generate_boundary(),
            parts: Vec::new(),
        }
    }

    /// Adds a part.
    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// The `multipart/form-data; boundary=...` content-type value.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// The total body length, if every part has a known size.
    pub fn known_length(&self) -> Option<u64> {
        let mut total = 0u64;
        for part in &self.parts {
            let header = part.header_block();
            total += 2 + self.boundary.len() as u64 + 2; // "--boundary\r\n"
            total += header.len() as u64;
            total += part.known_length()?;
            total += 2; // trailing CRLF after part body
        }
        total += 2 + self.boundary.len() as u64 + 4; // "--boundary--\r\n"
        Some(total)
    }

    /// Writes the full multipart body to `w`, streaming file parts instead
    /// of buffering them.
    pub async fn write_to<W: AsyncWrite + Unpin>(self, w: &mut W) -> Result<()> {
        use futures_util::StreamExt;

        for part in self.parts {
            w.write_all(format!("--{}\r\n", self.boundary).as_bytes())
                .await
                .map_err(Error::body)?;
            w.write_all(part.header_block().as_bytes())
                .await
                .map_err(Error::body)?;
            match part.data {
                PartData::Bytes(bytes) => {
                    w.write_all(&bytes).await.map_err(Error::body)?;
                }
                PartData::Stream(mut stream) => {
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk.map_err(Error::body)?;
                        w.write_all(&chunk).await.map_err(Error::body)?;
                    }
                }
            }
            w.write_all(b"\r\n").await.map_err(Error::body)?;
        }
        w.write_all(format!("--{}--\r\n", self.boundary).as_bytes())
            .await
            .map_err(Error::body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_32_hex_chars() {
        let b = generate_boundary();
        assert_eq!(b.len(), 32);
        assert!(b.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn known_length_matches_actual_bytes_written() {
        let multipart = Multipart::new()
            .part(Part::text("field", Bytes::from_static(b"value")))
            .part(Part::text("other", Bytes::from_static(b"x")));
        let expected_len = multipart.known_length().unwrap();

        let mut out = Vec::new();
        multipart.write_to(&mut out).await.unwrap();
        assert_eq!(out.len() as u64, expected_len);
        assert!(out.windows(2).filter(|w| *w == b"--").count() >= 2);
    }
}
