//! Pull parser for the root part's XML, on top of [`quick_xml::NsReader`].

use std::borrow::Cow;
use std::io::Cursor;

use quick_xml::escape::unescape;
use quick_xml::events::Event;
use quick_xml::events::attributes::Attribute;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;

use super::{XML_NAMESPACE, is_xml_char};
use crate::xop::{Error, MalformedKind, Result};

/// A resolved XML node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Start tag; namespace declarations are consumed, not reported
    Start {
        /// Local name
        name: String,
        /// Resolved namespace URI
        namespace: String,
        /// `(local name, namespace, value)` in document order
        attributes: Vec<(String, String, String)>,
    },
    /// End tag, also produced for empty-element tags
    End,
    /// Coalesced character data
    Text(String),
}

enum Step {
    Node(XmlNode),
    Text(String),
    Skip,
    Eof,
}

/// Pull parser over a decoded document.
///
/// Adjacent text, CDATA and character references come back as one
/// [`XmlNode::Text`]; comments and processing instructions are dropped.
pub struct XmlPullParser {
    reader: NsReader<Cursor<Vec<u8>>>,
    buf: Vec<u8>,
    base_offset: usize,
    depth: usize,
    seen_root: bool,
    peeked: Option<XmlNode>,
}

impl std::fmt::Debug for XmlPullParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlPullParser")
            .field("base_offset", &self.base_offset)
            .field("depth", &self.depth)
            .field("seen_root", &self.seen_root)
            .finish_non_exhaustive()
    }
}

impl XmlPullParser {
    /// Parser over `text`. Error offsets are reported relative to `base_offset`.
    #[must_use]
    pub fn new(text: String, base_offset: usize) -> Self {
        let mut reader = NsReader::from_reader(Cursor::new(text.into_bytes()));
        let config = reader.config_mut();
        config.trim_text(false);
        config.expand_empty_elements = true;
        config.check_end_names = true;
        Self {
            reader,
            buf: Vec::new(),
            base_offset,
            depth: 0,
            seen_root: false,
            peeked: None,
        }
    }

    /// Current element depth.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Next node, or `None` once the document element is closed and only
    /// trailing misc remains.
    pub fn next_node(&mut self) -> Result<Option<XmlNode>> {
        if let Some(node) = self.peeked.take() {
            return Ok(Some(node));
        }

        let mut text = String::new();
        loop {
            let node = match self.step()? {
                Step::Node(node) => node,
                Step::Text(chunk) => {
                    text.push_str(&chunk);
                    continue;
                }
                Step::Skip => continue,
                Step::Eof => {
                    if self.depth > 0 {
                        return Err(self.error("unexpected end of document"));
                    }
                    if !self.seen_root {
                        return Err(self.error("no document element"));
                    }
                    return Ok(None);
                }
            };
            if text.is_empty() {
                return Ok(Some(node));
            }
            self.peeked = Some(node);
            return Ok(Some(XmlNode::Text(text)));
        }
    }

    fn step(&mut self) -> Result<Step> {
        self.buf.clear();
        let offset = self.base_offset + self.position();
        let (resolved, event) = self
            .reader
            .read_resolved_event_into(&mut self.buf)
            .map_err(|err| invalid_xml(offset, err.to_string()))?;
        let element_ns = namespace_uri(resolved);

        match event {
            Event::Start(start) => {
                if self.seen_root && self.depth == 0 {
                    return Err(invalid_xml(offset, "more than one document element"));
                }
                let namespace = element_ns.map_err(|msg| invalid_xml(offset, msg))?;
                let name = utf8(start.local_name().as_ref(), offset)?.to_owned();

                let mut attributes: Vec<(String, String, String)> = Vec::new();
                for attribute in start.attributes() {
                    let attribute = attribute.map_err(|err| invalid_xml(offset, err.to_string()))?;
                    let key = attribute.key.as_ref();
                    if key == b"xmlns" || key.starts_with(b"xmlns:") {
                        continue;
                    }
                    let (local, namespace) = resolve_attribute(&self.reader, &attribute, offset)?;
                    if attributes
                        .iter()
                        .any(|(n, ns, _)| *n == local && *ns == namespace)
                    {
                        return Err(invalid_xml(offset, format!("duplicate attribute {local}")));
                    }
                    let value = attribute_value(&attribute.value, offset)?;
                    attributes.push((local, namespace, value));
                }

                self.depth += 1;
                self.seen_root = true;
                Ok(Step::Node(XmlNode::Start {
                    name,
                    namespace,
                    attributes,
                }))
            }
            Event::End(_) => {
                self.depth = self
                    .depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid_xml(offset, "unexpected end tag"))?;
                Ok(Step::Node(XmlNode::End))
            }
            Event::Text(text) => {
                let raw = utf8(&text, offset)?;
                if self.depth == 0 {
                    if raw.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n')) {
                        return Ok(Step::Skip);
                    }
                    return Err(invalid_xml(offset, "text outside the document element"));
                }
                let normalized = normalize_newlines(raw);
                let value = unescape(&normalized).map_err(|err| invalid_xml(offset, err.to_string()))?;
                check_chars(&value, offset)?;
                Ok(Step::Text(value.into_owned()))
            }
            Event::CData(data) => {
                if self.depth == 0 {
                    return Err(invalid_xml(offset, "CDATA outside the document element"));
                }
                let value = normalize_newlines(utf8(&data, offset)?).into_owned();
                check_chars(&value, offset)?;
                Ok(Step::Text(value))
            }
            Event::DocType(_) => Err(invalid_xml(offset, "DTDs are not allowed")),
            Event::Eof => Ok(Step::Eof),
            _ => Ok(Step::Skip),
        }
    }

    fn position(&self) -> usize {
        usize::try_from(self.reader.buffer_position()).unwrap_or(usize::MAX)
    }

    fn error(&self, message: &str) -> Error {
        invalid_xml(self.base_offset + self.position(), message)
    }
}

fn invalid_xml(offset: usize, message: impl Into<String>) -> Error {
    Error::malformed(MalformedKind::InvalidXml(message.into()), offset)
}

fn namespace_uri(resolved: ResolveResult<'_>) -> std::result::Result<String, String> {
    match resolved {
        ResolveResult::Bound(Namespace(uri)) => {
            String::from_utf8(uri.to_vec()).map_err(|_| "namespace is not UTF-8".to_owned())
        }
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => Err(format!(
            "unbound prefix {}",
            String::from_utf8_lossy(&prefix)
        )),
    }
}

fn resolve_attribute<R>(
    reader: &NsReader<R>,
    attribute: &Attribute<'_>,
    offset: usize,
) -> Result<(String, String)> {
    let is_xml = attribute
        .key
        .prefix()
        .is_some_and(|prefix| prefix.as_ref() == b"xml");
    let (namespace, local) = if is_xml {
        (XML_NAMESPACE.to_owned(), attribute.key.local_name())
    } else {
        let (resolved, local) = reader.resolve_attribute(attribute.key);
        let namespace = namespace_uri(resolved).map_err(|msg| invalid_xml(offset, msg))?;
        (namespace, local)
    };
    Ok((utf8(local.as_ref(), offset)?.to_owned(), namespace))
}

fn utf8(bytes: &[u8], offset: usize) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| invalid_xml(offset, "invalid UTF-8"))
}

/// Literal whitespace is normalized before references are expanded, so
/// `&#x9;` survives as a tab while a raw tab becomes a space.
fn attribute_value(raw: &[u8], offset: usize) -> Result<String> {
    let normalized: String = normalize_newlines(utf8(raw, offset)?)
        .chars()
        .map(|c| if matches!(c, '\t' | '\n') { ' ' } else { c })
        .collect();
    let value = unescape(&normalized).map_err(|err| invalid_xml(offset, err.to_string()))?;
    check_chars(&value, offset)?;
    Ok(value.into_owned())
}

fn normalize_newlines(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

fn check_chars(value: &str, offset: usize) -> Result<()> {
    if value.chars().all(is_xml_char) {
        Ok(())
    } else {
        Err(invalid_xml(offset, "invalid character in document"))
    }
}
