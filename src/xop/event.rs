//! XML infoset events exchanged with the MTOM writer and reader.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use super::OCTET_STREAM;

/// One step of an XML infoset in document order.
///
/// Names are local names; the namespace is the resolved namespace URI
/// (empty for no namespace). Prefixes are not part of the infoset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfosetEvent {
    /// Element start tag
    StartElement {
        /// Local name
        name: String,
        /// Namespace URI, empty when unqualified
        namespace: String,
    },
    /// Attribute of the most recently started element
    Attribute {
        /// Local name
        name: String,
        /// Namespace URI, empty when unqualified
        namespace: String,
        /// Attribute value
        value: String,
    },
    /// Character data
    Text {
        /// Text content
        value: String,
    },
    /// Binary content, inlined as base64 or carried in its own MIME part
    BinaryValue {
        /// Raw bytes
        bytes: Bytes,
        /// MIME type of the bytes
        content_type: String,
    },
    /// Element end tag
    EndElement,
    /// End of the infoset
    EndDocument,
}

impl InfosetEvent {
    /// Start an element.
    pub fn start(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::StartElement {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Unqualified attribute.
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Attribute {
            name: name.into(),
            namespace: String::new(),
            value: value.into(),
        }
    }

    /// Character data.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    /// Binary value typed `application/octet-stream`.
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self::BinaryValue {
            bytes: bytes.into(),
            content_type: OCTET_STREAM.to_owned(),
        }
    }

    /// Bytes carried by this event when read as binary content.
    ///
    /// `BinaryValue` yields its bytes; `Text` is decoded as base64, which is
    /// how values below the inline threshold travel. Anything else is `None`.
    #[must_use]
    pub fn binary_content(&self) -> Option<Bytes> {
        match self {
            Self::BinaryValue { bytes, .. } => Some(bytes.clone()),
            Self::Text { value } => {
                let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                STANDARD.decode(compact).ok().map(Bytes::from)
            }
            _ => None,
        }
    }

    /// Short event name for logging.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::StartElement { .. } => "start_element",
            Self::Attribute { .. } => "attribute",
            Self::Text { .. } => "text",
            Self::BinaryValue { .. } => "binary_value",
            Self::EndElement => "end_element",
            Self::EndDocument => "end_document",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_content_from_text() {
        let event = InfosetEvent::text("AAEC\r\n/w==");
        assert_eq!(event.binary_content().unwrap().as_ref(), &[0, 1, 2, 0xff]);
    }

    #[test]
    fn test_binary_content_rejects_non_base64() {
        assert!(InfosetEvent::text("not base64!").binary_content().is_none());
        assert!(InfosetEvent::EndElement.binary_content().is_none());
    }
}
