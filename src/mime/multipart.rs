//! Splitting a multipart body on its boundary, and writing delimiters.

use std::io::{self, Write};

use bytes::Bytes;
use tracing::trace;

use super::header::Headers;
use super::{CRLF, find};
use crate::xop::{Error, MalformedKind, QuotaCategory, QuotaEnforcer, Result};

/// A part as found on the wire, before its headers are interpreted.
#[derive(Debug, Clone)]
pub struct RawPart {
    /// Part headers
    pub headers: Headers,
    /// Raw body, a view into the input
    pub body: Bytes,
    /// Offset of the body within the input
    pub offset: usize,
}

/// Result of splitting a multipart body.
#[derive(Debug, Clone)]
pub struct Multipart {
    /// Parts in wire order
    pub parts: Vec<RawPart>,
    /// Bytes consumed up to and including the closing delimiter line
    pub consumed: usize,
}

/// Split `data` into parts, starting the search at `from`.
///
/// Anything before the first delimiter is preamble and anything after the
/// closing delimiter is epilogue; both are ignored. Every byte up to the
/// closing delimiter is charged against `MessageBytes`, and every body
/// against `PartBytes`.
pub fn split(
    data: &Bytes,
    from: usize,
    boundary: &str,
    quotas: &mut QuotaEnforcer,
) -> Result<Multipart> {
    let mut delimiter = Vec::with_capacity(boundary.len() + 4);
    delimiter.extend_from_slice(CRLF);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary.as_bytes());
    let dash_boundary = &delimiter[2..];

    let mut pos = if data[from..].starts_with(dash_boundary) {
        from
    } else {
        find(data, &delimiter, from)
            .map(|idx| idx + 2)
            .ok_or_else(|| Error::malformed(MalformedKind::MissingBoundary, from))?
    };
    let mut charged = from;
    let mut parts = Vec::new();

    loop {
        let after = pos + dash_boundary.len();
        let rest = &data[after..];

        if rest.starts_with(b"--") {
            let mut consumed = after + 2;
            if data[consumed..].starts_with(CRLF) {
                consumed += 2;
            }
            quotas.charge(QuotaCategory::MessageBytes, (consumed - charged) as u64)?;
            trace!(parts = parts.len(), consumed, "closing delimiter");
            return Ok(Multipart { parts, consumed });
        }

        let padding = rest
            .iter()
            .take_while(|&&b| b == b' ' || b == b'\t')
            .count();
        let line_end = after + padding;
        if data.len() < line_end + 2 {
            return Err(Error::malformed(MalformedKind::Truncated, data.len()));
        }
        if !data[line_end..].starts_with(CRLF) {
            return Err(Error::malformed(MalformedKind::InvalidDelimiter, pos));
        }

        let (headers, body_start) = Headers::parse(data, line_end + 2)?;
        let body_end = find(data, &delimiter, body_start)
            .ok_or_else(|| Error::malformed(MalformedKind::Truncated, data.len()))?;

        quotas.charge(QuotaCategory::MessageBytes, (body_end + 2 - charged) as u64)?;
        charged = body_end + 2;
        quotas.charge_item(QuotaCategory::PartBytes, (body_end - body_start) as u64)?;

        trace!(
            index = parts.len(),
            offset = body_start,
            len = body_end - body_start,
            "split part"
        );
        parts.push(RawPart {
            headers,
            body: data.slice(body_start..body_end),
            offset: body_start,
        });
        pos = body_end + 2;
    }
}

/// Write a delimiter line opening the next part. The first delimiter has no leading CRLF.
pub(crate) fn write_delimiter<W: Write>(out: &mut W, boundary: &str, first: bool) -> io::Result<()> {
    if !first {
        out.write_all(CRLF)?;
    }
    write!(out, "--{boundary}\r\n")
}

/// Write the closing delimiter line.
pub(crate) fn write_close_delimiter<W: Write>(out: &mut W, boundary: &str) -> io::Result<()> {
    write!(out, "\r\n--{boundary}--\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xop::Quotas;

    fn enforcer() -> QuotaEnforcer {
        QuotaEnforcer::new(Quotas::unbounded())
    }

    const MESSAGE: &[u8] = b"preamble\r\n--b1\r\nContent-ID: <r>\r\n\r\n<root/>\r\n--b1  \r\n\r\n\r\n--b1--\r\nepilogue";

    #[test]
    fn test_split_parts() {
        let data = Bytes::from_static(MESSAGE);
        let split = split(&data, 0, "b1", &mut enforcer()).unwrap();

        assert_eq!(split.parts.len(), 2);
        assert_eq!(split.parts[0].headers.get("content-id"), Some("<r>"));
        assert_eq!(split.parts[0].body.as_ref(), b"<root/>");
        assert!(split.parts[1].headers.is_empty());
        assert!(split.parts[1].body.is_empty());
        assert_eq!(&MESSAGE[split.consumed..], b"epilogue");
    }

    #[test]
    fn test_truncated_delimiter() {
        let cut = MESSAGE.len() - b"b1--\r\nepilogue".len() + 1;
        let data = Bytes::copy_from_slice(&MESSAGE[..cut]);
        let err = split(&data, 0, "b1", &mut enforcer()).unwrap_err();
        assert_eq!(err.malformed_kind(), Some(&MalformedKind::Truncated));
    }

    #[test]
    fn test_missing_boundary() {
        let data = Bytes::from_static(b"no delimiters at all");
        let err = split(&data, 0, "b1", &mut enforcer()).unwrap_err();
        assert_eq!(err.malformed_kind(), Some(&MalformedKind::MissingBoundary));
    }

    #[test]
    fn test_delimiter_with_trailing_garbage() {
        let data = Bytes::from_static(b"--b1x\r\n\r\nbody\r\n--b1--");
        let err = split(&data, 0, "b1", &mut enforcer()).unwrap_err();
        assert_eq!(err.malformed_kind(), Some(&MalformedKind::InvalidDelimiter));
    }

    #[test]
    fn test_part_quota() {
        let data = Bytes::from_static(MESSAGE);
        let mut quotas = QuotaEnforcer::new(Quotas::unbounded().with_max_part_size(3));
        let err = split(&data, 0, "b1", &mut quotas).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
    }
}
