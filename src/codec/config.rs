//! Writer and reader configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::xop::{Charset, DEFAULT_INLINE_THRESHOLD, DEFAULT_START_INFO, Error, Quotas, Result};

/// Longest boundary RFC 2046 allows.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Configuration for [`MtomWriter`](super::MtomWriter).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WriterConfig {
    /// Encoding of the root XML part.
    pub charset: Charset,
    /// Media type advertised for the root part payload (`type` / `start-info`).
    pub start_info: String,
    /// Caller-supplied boundary; generated when `None`.
    pub boundary: Option<String>,
    /// Caller-supplied root content-id; generated when `None`.
    pub start_uri: Option<String>,
    /// Emit the outer `MIME-Version` and `Content-Type` headers.
    pub write_message_headers: bool,
    /// Drop the sink once the message is finished.
    pub owns_stream: bool,
    /// Binary values of at least this many bytes become attachments.
    pub inline_threshold: usize,
    /// Size limits on the produced message.
    pub quotas: Quotas,
    /// Emit `<?xml ...?>` at the start of the root part.
    pub xml_declaration: bool,
    /// Seed for deterministic boundaries and content-ids.
    pub seed: Option<u64>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            charset: Charset::Utf8,
            start_info: DEFAULT_START_INFO.to_owned(),
            boundary: None,
            start_uri: None,
            write_message_headers: true,
            owns_stream: false,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            quotas: Quotas::unbounded(),
            xml_declaration: false,
            seed: None,
        }
    }
}

impl WriterConfig {
    /// Set the root part encoding.
    #[must_use]
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Set the start-info media type.
    #[must_use]
    pub fn with_start_info(mut self, start_info: impl Into<String>) -> Self {
        self.start_info = start_info.into();
        self
    }

    /// Use a fixed boundary.
    #[must_use]
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Use a fixed root content-id.
    #[must_use]
    pub fn with_start_uri(mut self, start_uri: impl Into<String>) -> Self {
        self.start_uri = Some(start_uri.into());
        self
    }

    /// Whether to emit the outer headers.
    #[must_use]
    pub fn with_message_headers(mut self, write: bool) -> Self {
        self.write_message_headers = write;
        self
    }

    /// Whether finishing the message also drops the sink.
    #[must_use]
    pub fn with_owns_stream(mut self, owns: bool) -> Self {
        self.owns_stream = owns;
        self
    }

    /// Set the inline threshold.
    #[must_use]
    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    /// Set the quotas.
    #[must_use]
    pub fn with_quotas(mut self, quotas: Quotas) -> Self {
        self.quotas = quotas;
        self
    }

    /// Whether to emit an XML declaration.
    #[must_use]
    pub fn with_xml_declaration(mut self, declare: bool) -> Self {
        self.xml_declaration = declare;
        self
    }

    /// Derive boundaries and content-ids from `seed`.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject combinations the writer cannot honour.
    pub fn validate(&self) -> Result<()> {
        if let Some(boundary) = &self.boundary {
            if !is_valid_boundary(boundary) {
                return Err(Error::usage(format!("invalid boundary {boundary:?}")));
            }
        } else if !self.write_message_headers {
            return Err(Error::usage(
                "a boundary must be supplied when message headers are written by the caller",
            ));
        }
        if let Some(start) = &self.start_uri {
            if start.is_empty() || start.contains(['<', '>', '\r', '\n']) {
                return Err(Error::usage(format!("invalid start uri {start:?}")));
            }
        }
        if self.start_info.contains(['\r', '\n']) {
            return Err(Error::usage("start info must be a single line"));
        }
        Ok(())
    }
}

/// Configuration for [`MtomReader`](super::MtomReader).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReaderConfig {
    /// Acceptable root part encodings in priority order; empty accepts any supported one.
    pub encodings: Vec<Charset>,
    /// Expected root content-id, overriding the `start` parameter.
    pub start_uri: Option<String>,
    /// Outer `Content-Type` when the transport already consumed the headers.
    pub content_type: Option<String>,
    /// Size limits on the consumed message.
    pub quotas: Quotas,
}

impl ReaderConfig {
    /// Set the acceptable encodings.
    #[must_use]
    pub fn with_encodings(mut self, encodings: impl Into<Vec<Charset>>) -> Self {
        self.encodings = encodings.into();
        self
    }

    /// Expect the root part under `start_uri`.
    #[must_use]
    pub fn with_start_uri(mut self, start_uri: impl Into<String>) -> Self {
        self.start_uri = Some(start_uri.into());
        self
    }

    /// Supply the outer `Content-Type` value.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the quotas.
    #[must_use]
    pub fn with_quotas(mut self, quotas: Quotas) -> Self {
        self.quotas = quotas;
        self
    }
}

/// Whether `boundary` is a legal RFC 2046 boundary.
#[must_use]
pub fn is_valid_boundary(boundary: &str) -> bool {
    (1..=MAX_BOUNDARY_LEN).contains(&boundary.len())
        && !boundary.ends_with(' ')
        && boundary
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b))
}
