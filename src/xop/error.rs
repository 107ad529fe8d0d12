//! MTOM codec error types

use thiserror::Error;

use super::quota::QuotaExceeded;

/// MTOM codec errors
///
/// Every error is terminal for the writer or reader instance that raised it.
#[derive(Error, Debug)]
pub enum Error {
    /// The codec was driven in an order it does not support
    #[error("protocol usage error: {reason}")]
    ProtocolUsage {
        /// What the caller did wrong
        reason: String,
    },

    /// The input is not a well-formed MTOM message
    #[error("malformed message at byte {offset}{}: {kind}", content_id_suffix(.content_id.as_deref()))]
    Malformed {
        /// What is wrong with the input
        kind: MalformedKind,
        /// Byte offset into the input window where the problem was detected
        offset: usize,
        /// Content-ID of the part involved, when known
        content_id: Option<String>,
    },

    /// A configured quota was breached
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    /// A caller-supplied boundary occurs inside a part body
    #[error("boundary {boundary:?} occurs inside the message content")]
    BoundaryCollision {
        /// The colliding boundary token
        boundary: String,
    },

    /// IO error on the underlying sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a message is rejected as malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    /// No boundary could be found or inferred
    #[error("missing multipart boundary")]
    MissingBoundary,

    /// A delimiter line carries bytes other than transport padding
    #[error("invalid boundary delimiter line")]
    InvalidDelimiter,

    /// Input ended before the closing delimiter
    #[error("message truncated before closing boundary")]
    Truncated,

    /// A header line could not be parsed
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Content-Type is not what MTOM requires
    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    /// The start part could not be located
    #[error("root part not found")]
    RootNotFound,

    /// Two parts share a Content-ID
    #[error("duplicate content-id")]
    DuplicateContentId,

    /// `xop:Include` points at a part that does not exist
    #[error("xop:Include references unknown part {href:?}")]
    UnresolvedInclude {
        /// The raw href value
        href: String,
    },

    /// A part was referenced by more than one `xop:Include`
    #[error("part referenced more than once")]
    DuplicateInclude,

    /// A non-root part was never referenced
    #[error("attachment part is never referenced")]
    OrphanPart,

    /// `xop:Include` without an href or with content
    #[error("invalid xop:Include: {0}")]
    InvalidInclude(&'static str),

    /// Declared charset is unsupported or not among the accepted encodings
    #[error("unsupported character encoding {0:?}")]
    UnsupportedEncoding(String),

    /// Content-Transfer-Encoding other than binary, 8bit, 7bit or base64
    #[error("unsupported transfer encoding {0:?}")]
    UnsupportedTransferEncoding(String),

    /// Base64 part body failed to decode
    #[error("invalid base64 body")]
    InvalidBase64,

    /// Root part body is not well-formed XML
    #[error("invalid XML: {0}")]
    InvalidXml(String),
}

fn content_id_suffix(content_id: Option<&str>) -> String {
    content_id.map_or_else(String::new, |id| format!(" (part <{id}>)"))
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programmer error
    ProtocolUsage,
    /// Corrupt or unsupported input
    Malformed,
    /// Oversized input or output
    QuotaExceeded,
    /// Underlying IO failure
    Io,
}

impl Error {
    pub(crate) fn usage(reason: impl Into<String>) -> Self {
        Self::ProtocolUsage {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(kind: MalformedKind, offset: usize) -> Self {
        Self::Malformed {
            kind,
            offset,
            content_id: None,
        }
    }

    pub(crate) fn malformed_part(kind: MalformedKind, offset: usize, content_id: &str) -> Self {
        Self::Malformed {
            kind,
            offset,
            content_id: Some(content_id.to_owned()),
        }
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProtocolUsage { .. } | Self::BoundaryCollision { .. } => ErrorKind::ProtocolUsage,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Malformed reason, if this is a malformed-message error
    #[must_use]
    pub fn malformed_kind(&self) -> Option<&MalformedKind> {
        match self {
            Self::Malformed { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
