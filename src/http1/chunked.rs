//! Chunked transfer-coding framing (`spec.md` §4.4, RFC 7230 §4.1).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Frames one chunk as `hex(len) CRLF bytes CRLF`. An empty slice frames
/// the terminating `0 CRLF CRLF` chunk.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Writes the terminating zero-length chunk and trailer CRLF.
pub async fn write_terminator<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    w.write_all(b"0\r\n\r\n").await.map_err(Error::request)
}

/// Writes `data` as a single chunked-transfer chunk.
pub async fn write_chunk<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    w.write_all(&encode_chunk(data)).await.map_err(Error::request)
}

/// Reads and decodes one chunk from a chunked-transfer body.
///
/// Returns `Ok(None)` once the terminating zero-length chunk (and its
/// trailing CRLF) has been consumed.
pub async fn read_chunk<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let size_line = read_line(r).await?;
    let size_str = size_line
        .split(';')
        .next()
        .unwrap_or("")
        .trim();
    let size = usize::from_str_radix(size_str, 16)
        .map_err(|_| Error::http_parse("invalid chunk size"))?;

    if size == 0 {
        // Consume (and ignore) any trailer headers up to the blank line.
        loop {
            let line = read_line(r).await?;
            if line.is_empty() {
                break;
            }
        }
        return Ok(None);
    }

    let mut buf = vec![0u8; size];
    r.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::http_parse("truncated chunk body")
        } else {
            Error::request(e)
        }
    })?;

    let mut crlf = [0u8; 2];
    r.read_exact(&mut crlf).await.map_err(Error::request)?;
    if &crlf != b"\r\n" {
        return Err(Error::http_parse("missing chunk CRLF terminator"));
    }

    Ok(Some(buf))
}

async fn read_line<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = r.read(&mut byte).await.map_err(Error::request)?;
        if n == 0 {
            return Err(Error::http_parse("unexpected eof reading chunk line"));
        }
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            break;
        }
        line.push(byte[0]);
        if line.len() > 8 * 1024 {
            return Err(Error::http_parse("chunk size line too long"));
        }
    }
    String::from_utf8(line).map_err(|_| Error::http_parse("non-utf8 chunk size line"))
}
