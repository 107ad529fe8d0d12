//! Streaming XML serializer with automatic namespace declarations.

use std::borrow::Cow;
use std::io;

use quick_xml::Writer;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;

use super::{XML_NAMESPACE, XMLNS_NAMESPACE, is_ncname, is_xml_char};
use crate::xop::{Charset, Error, Result};

#[derive(Debug)]
struct Scope {
    tag: String,
    default_ns: String,
    prefixes: Vec<(String, String)>,
}

/// Start tag still accepting attributes.
#[derive(Debug)]
struct PendingStart {
    start: BytesStart<'static>,
    attributes: Vec<(String, String)>,
}

/// Serializes infoset calls into XML through [`quick_xml::Writer`].
///
/// Element namespaces are declared as default namespaces. Namespaced
/// attributes get generated `a{n}` prefixes declared on the element that
/// first needs them.
pub struct XmlSerializer {
    writer: Writer<Vec<u8>>,
    scopes: Vec<Scope>,
    pending: Option<PendingStart>,
    root_closed: bool,
    next_prefix: u32,
}

impl Default for XmlSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for XmlSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlSerializer")
            .field("len", &self.len())
            .field("depth", &self.scopes.len())
            .field("pending", &self.pending)
            .field("root_closed", &self.root_closed)
            .finish_non_exhaustive()
    }
}

impl XmlSerializer {
    /// Empty serializer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
            scopes: Vec::new(),
            pending: None,
            root_closed: false,
            next_prefix: 0,
        }
    }

    /// UTF-8 output so far. A start tag still taking attributes is not included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.writer.get_ref()
    }

    /// Length of the output so far in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writer.get_ref().len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writer.get_ref().is_empty() && self.pending.is_none()
    }

    /// Current element depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Whether the document element has been closed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.root_closed
    }

    /// Write an XML declaration. Only valid before any element.
    pub fn declaration(&mut self, charset: Charset) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::usage("XML declaration must come first"));
        }
        self.emit(Event::Decl(BytesDecl::new("1.0", Some(charset.label()), None)))
    }

    /// Open an element in `namespace` (empty for none).
    pub fn start_element(&mut self, name: &str, namespace: &str) -> Result<()> {
        self.begin_element(name)?;
        let mut start = BytesStart::new(name.to_owned());

        let inherited = self.scopes.last().map_or("", |scope| scope.default_ns.as_str());
        if inherited != namespace {
            push_attribute(&mut start, "xmlns", namespace);
        }
        self.scopes.push(Scope {
            tag: name.to_owned(),
            default_ns: namespace.to_owned(),
            prefixes: Vec::new(),
        });
        self.pending = Some(PendingStart {
            start,
            attributes: Vec::new(),
        });
        Ok(())
    }

    /// Open a prefixed element and declare its prefix on it.
    pub fn start_prefixed_element(&mut self, prefix: &str, name: &str, namespace: &str) -> Result<()> {
        if !is_ncname(prefix) || namespace.is_empty() {
            return Err(Error::usage(format!("invalid prefix binding {prefix}={namespace}")));
        }
        self.begin_element(name)?;
        let tag = format!("{prefix}:{name}");
        let mut start = BytesStart::new(tag.clone());
        push_attribute(&mut start, &format!("xmlns:{prefix}"), namespace);

        let default_ns = self
            .scopes
            .last()
            .map(|scope| scope.default_ns.clone())
            .unwrap_or_default();
        self.scopes.push(Scope {
            tag,
            default_ns,
            prefixes: vec![(prefix.to_owned(), namespace.to_owned())],
        });
        self.pending = Some(PendingStart {
            start,
            attributes: Vec::new(),
        });
        Ok(())
    }

    /// Add an attribute to the element just opened.
    pub fn attribute(&mut self, name: &str, namespace: &str, value: &str) -> Result<()> {
        if self.pending.is_none() {
            return Err(Error::usage("attribute written outside a start tag"));
        }
        if !is_ncname(name) {
            return Err(Error::usage(format!("invalid attribute name {name:?}")));
        }
        if namespace == XMLNS_NAMESPACE || (namespace.is_empty() && name == "xmlns") {
            return Err(Error::usage("namespace declarations are written automatically"));
        }
        check_chars(value)?;
        let duplicate = self.pending.as_ref().is_some_and(|pending| {
            pending
                .attributes
                .iter()
                .any(|(n, ns)| n == name && ns == namespace)
        });
        if duplicate {
            return Err(Error::usage(format!("duplicate attribute {name:?}")));
        }

        let key = if namespace == XML_NAMESPACE {
            format!("xml:{name}")
        } else if namespace.is_empty() {
            name.to_owned()
        } else {
            let prefix = match self.lookup_prefix(namespace) {
                Some(prefix) => prefix,
                None => self.declare_prefix(namespace),
            };
            format!("{prefix}:{name}")
        };

        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| Error::usage("attribute written outside a start tag"))?;
        pending
            .attributes
            .push((name.to_owned(), namespace.to_owned()));
        push_attribute(&mut pending.start, &key, value);
        Ok(())
    }

    /// Write character data inside the current element.
    pub fn text(&mut self, value: &str) -> Result<()> {
        check_chars(value)?;
        let escaped = escape_text(value);
        self.raw_text(&escaped)
    }

    /// Write already-escaped character data, e.g. base64 output.
    pub fn raw_text(&mut self, value: &str) -> Result<()> {
        if self.scopes.is_empty() {
            return Err(Error::usage("text written outside the document element"));
        }
        self.flush_start()?;
        if value.is_empty() {
            return Ok(());
        }
        self.emit(Event::Text(BytesText::from_escaped(value)))
    }

    /// Close the innermost element.
    pub fn end_element(&mut self) -> Result<()> {
        let scope = self
            .scopes
            .pop()
            .ok_or_else(|| Error::usage("end element without matching start"))?;
        match self.pending.take() {
            Some(pending) => self.emit(Event::Empty(pending.start))?,
            None => self.emit(Event::End(BytesEnd::new(scope.tag)))?,
        }
        if self.scopes.is_empty() {
            self.root_closed = true;
        }
        Ok(())
    }

    fn begin_element(&mut self, name: &str) -> Result<()> {
        if self.root_closed {
            return Err(Error::usage("document element already closed"));
        }
        if !is_ncname(name) {
            return Err(Error::usage(format!("invalid element name {name:?}")));
        }
        self.flush_start()
    }

    fn flush_start(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(pending) => self.emit(Event::Start(pending.start)),
            None => Ok(()),
        }
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|err| Error::Io(io::Error::other(err.to_string())))
    }

    fn lookup_prefix(&self, namespace: &str) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.prefixes.iter())
            .find(|(_, ns)| ns == namespace)
            .map(|(prefix, _)| prefix.clone())
    }

    fn declare_prefix(&mut self, namespace: &str) -> String {
        let prefix = format!("a{}", self.next_prefix);
        self.next_prefix += 1;
        if let Some(pending) = self.pending.as_mut() {
            push_attribute(&mut pending.start, &format!("xmlns:{prefix}"), namespace);
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.prefixes.push((prefix.clone(), namespace.to_owned()));
        }
        prefix
    }
}

/// Push `key="value"`, escaping the value so whitespace survives attribute normalization.
fn push_attribute(start: &mut BytesStart<'_>, key: &str, value: &str) {
    start.push_attribute(Attribute {
        key: QName(key.as_bytes()),
        value: Cow::Owned(escape_attribute(value).into_bytes()),
    });
}

fn check_chars(value: &str) -> Result<()> {
    match value.chars().find(|&ch| !is_xml_char(ch)) {
        Some(ch) => Err(Error::usage(format!(
            "character U+{:04X} cannot be represented in XML",
            u32::from(ch)
        ))),
        None => Ok(()),
    }
}

// Literal CR would be read back as LF.
fn escape_text(value: &str) -> Cow<'_, str> {
    let escaped = partial_escape(value);
    if escaped.contains('\r') {
        Cow::Owned(escaped.replace('\r', "&#xD;"))
    } else {
        escaped
    }
}

fn escape_attribute(value: &str) -> String {
    escape(value)
        .replace('\t', "&#x9;")
        .replace('\n', "&#xA;")
        .replace('\r', "&#xD;")
}
