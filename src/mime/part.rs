//! Decoded MIME parts.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use super::header::{ContentType, parse_content_id};
use super::multipart::RawPart;
use super::names;
use crate::xop::{Error, MalformedKind, OCTET_STREAM, Result};

/// `Content-Transfer-Encoding` of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `binary`, `8bit` or `7bit`: body is used as-is
    Binary,
    /// `base64`
    Base64,
    /// Anything else
    Other(String),
}

impl TransferEncoding {
    /// Parse a header value. A missing header means `7bit`, i.e. [`TransferEncoding::Binary`].
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::Binary;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "binary" | "8bit" | "7bit" => Self::Binary,
            "base64" => Self::Base64,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Base64 => f.write_str("base64"),
            Self::Other(value) => f.write_str(value),
        }
    }
}

/// One part of a multipart/related message.
///
/// `body` holds the decoded bytes. For binary parts it is a view into the
/// input buffer rather than a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    /// Content-ID without angle brackets; empty when the part carries none
    pub content_id: String,
    /// Content-Type
    pub content_type: ContentType,
    /// Transfer encoding as declared
    pub transfer_encoding: TransferEncoding,
    /// Decoded body
    pub body: Bytes,
    /// Offset of the raw body within the input window
    pub offset: usize,
}

impl MimePart {
    /// Interpret a raw part's headers and decode its body.
    pub fn from_raw(raw: RawPart) -> Result<Self> {
        let content_id = raw
            .headers
            .get(names::CONTENT_ID)
            .map(parse_content_id)
            .unwrap_or_default()
            .to_owned();

        let content_type = match raw.headers.get(names::CONTENT_TYPE) {
            Some(value) => ContentType::parse(value).ok_or_else(|| {
                Error::malformed_part(
                    MalformedKind::InvalidContentType(value.to_owned()),
                    raw.offset,
                    &content_id,
                )
            })?,
            None => ContentType::new(OCTET_STREAM),
        };

        let transfer_encoding =
            TransferEncoding::parse(raw.headers.get(names::CONTENT_TRANSFER_ENCODING));
        let body = match &transfer_encoding {
            TransferEncoding::Binary => raw.body,
            TransferEncoding::Base64 => {
                let compact: Vec<u8> = raw
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                let decoded = STANDARD.decode(compact).map_err(|_| {
                    Error::malformed_part(MalformedKind::InvalidBase64, raw.offset, &content_id)
                })?;
                Bytes::from(decoded)
            }
            TransferEncoding::Other(value) => {
                return Err(Error::malformed_part(
                    MalformedKind::UnsupportedTransferEncoding(value.clone()),
                    raw.offset,
                    &content_id,
                ));
            }
        };

        Ok(Self {
            content_id,
            content_type,
            transfer_encoding,
            body,
            offset: raw.offset,
        })
    }

    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::Headers;

    fn raw(headers: &[(&str, &str)], body: &'static [u8]) -> RawPart {
        let mut map = Headers::new();
        for (name, value) in headers {
            map.push(*name, *value);
        }
        RawPart {
            headers: map,
            body: Bytes::from_static(body),
            offset: 42,
        }
    }

    #[test]
    fn test_binary_part_is_zero_copy() {
        let part = MimePart::from_raw(raw(
            &[("Content-ID", "<a@b>"), ("Content-Type", "image/png")],
            b"\x89PNG",
        ))
        .unwrap();
        assert_eq!(part.content_id, "a@b");
        assert!(part.content_type.is("image/png"));
        assert_eq!(part.transfer_encoding, TransferEncoding::Binary);
        assert_eq!(part.body.as_ref(), b"\x89PNG");
    }

    #[test]
    fn test_base64_part_is_decoded() {
        let part = MimePart::from_raw(raw(
            &[("Content-Transfer-Encoding", "BASE64")],
            b"aGVs\r\nbG8=",
        ))
        .unwrap();
        assert_eq!(part.body.as_ref(), b"hello");
        assert!(part.content_type.is(OCTET_STREAM));
    }

    #[test]
    fn test_quoted_printable_rejected() {
        let err = MimePart::from_raw(raw(
            &[("Content-ID", "<q@b>"), ("Content-Transfer-Encoding", "quoted-printable")],
            b"x",
        ))
        .unwrap_err();
        match err {
            Error::Malformed {
                kind: MalformedKind::UnsupportedTransferEncoding(value),
                offset,
                content_id,
            } => {
                assert_eq!(value, "quoted-printable");
                assert_eq!(offset, 42);
                assert_eq!(content_id.as_deref(), Some("q@b"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
