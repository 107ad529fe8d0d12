//! MTOM writer: infoset calls in, multipart/related bytes out.

use std::io::Write;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use tracing::{debug, instrument, trace};

use super::config::WriterConfig;
use crate::mime::{ContentType, Headers, names, write_close_delimiter, write_delimiter};
use crate::xml::XmlSerializer;
use crate::xop::{
    CID_SCHEME, Error, IdGenerator, InfosetEvent, MULTIPART_RELATED, MessageStats, OCTET_STREAM,
    QuotaCategory, QuotaEnforcer, Result, XOP_INCLUDE, XOP_MEDIA_TYPE, XOP_NAMESPACE, XOP_PREFIX,
    collides,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Finished,
    Failed,
}

#[derive(Debug)]
struct Attachment {
    content_id: String,
    content_type: String,
    body: Bytes,
}

/// Serializes one MTOM message into a sink.
///
/// The root part and attachments are buffered until [`MtomWriter::finish`],
/// which picks a boundary that occurs in none of them and then writes the
/// whole message. Any error leaves the writer unusable.
#[derive(Debug)]
pub struct MtomWriter<W: Write> {
    sink: Option<W>,
    config: WriterConfig,
    ids: IdGenerator,
    start_id: String,
    boundary: Option<String>,
    xml: XmlSerializer,
    attachments: Vec<Attachment>,
    quotas: QuotaEnforcer,
    stats: MessageStats,
    state: WriterState,
}

impl<W: Write> MtomWriter<W> {
    /// Create a writer over `sink`.
    pub fn new(sink: W, config: WriterConfig) -> Result<Self> {
        config.validate()?;
        let ids = match config.seed {
            Some(seed) => IdGenerator::seeded(seed),
            None => IdGenerator::random(),
        };
        let start_id = config.start_uri.clone().unwrap_or_else(|| ids.start_id());
        let mut writer = Self {
            sink: Some(sink),
            boundary: config.boundary.clone(),
            quotas: QuotaEnforcer::new(config.quotas),
            config,
            ids,
            start_id,
            xml: XmlSerializer::new(),
            attachments: Vec::new(),
            stats: MessageStats::default(),
            state: WriterState::Open,
        };
        if writer.config.xml_declaration {
            let charset = writer.config.charset;
            writer.guarded(|w| w.append_xml(|xml| xml.declaration(charset)))?;
        }
        Ok(writer)
    }

    /// Content-ID of the root part.
    #[must_use]
    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    /// Boundary, once known. Generated boundaries are chosen by [`MtomWriter::finish`].
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// Outer `Content-Type` value, once the boundary is known.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.boundary
            .as_deref()
            .map(|boundary| self.message_content_type(boundary).to_string())
    }

    /// Counters for this message.
    #[must_use]
    pub const fn stats(&self) -> &MessageStats {
        &self.stats
    }

    /// Open an element.
    pub fn write_start_element(&mut self, name: &str, namespace: &str) -> Result<()> {
        self.guarded(|w| {
            reject_xop_namespace(namespace)?;
            w.quotas.charge(QuotaCategory::Depth, 1)?;
            w.append_xml(|xml| xml.start_element(name, namespace))
        })
    }

    /// Add an attribute to the element just opened.
    pub fn write_attribute(&mut self, name: &str, namespace: &str, value: &str) -> Result<()> {
        self.guarded(|w| {
            reject_xop_namespace(namespace)?;
            w.check_string(value)?;
            w.append_xml(|xml| xml.attribute(name, namespace, value))
        })
    }

    /// Write character data.
    pub fn write_text(&mut self, value: &str) -> Result<()> {
        self.guarded(|w| {
            w.check_string(value)?;
            w.append_xml(|xml| xml.text(value))
        })
    }

    /// Write a binary value, inlined or externalized by size.
    pub fn write_binary(&mut self, bytes: impl Into<Bytes>, content_type: &str) -> Result<()> {
        let bytes = bytes.into();
        self.guarded(|w| w.binary(bytes, content_type))
    }

    /// Close the innermost element.
    pub fn write_end_element(&mut self) -> Result<()> {
        self.guarded(|w| {
            w.append_xml(XmlSerializer::end_element)?;
            w.quotas.release(QuotaCategory::Depth, 1);
            Ok(())
        })
    }

    /// Close every open element.
    pub fn write_end_document(&mut self) -> Result<()> {
        self.guarded(|w| {
            if w.xml.depth() == 0 && !w.xml.is_complete() {
                return Err(Error::usage("document has no element"));
            }
            while w.xml.depth() > 0 {
                w.append_xml(XmlSerializer::end_element)?;
                w.quotas.release(QuotaCategory::Depth, 1);
            }
            Ok(())
        })
    }

    /// Dispatch one infoset event.
    pub fn write_event(&mut self, event: &InfosetEvent) -> Result<()> {
        trace!(kind = event.kind_name(), "write event");
        match event {
            InfosetEvent::StartElement { name, namespace } => {
                self.write_start_element(name, namespace)
            }
            InfosetEvent::Attribute {
                name,
                namespace,
                value,
            } => self.write_attribute(name, namespace, value),
            InfosetEvent::Text { value } => self.write_text(value),
            InfosetEvent::BinaryValue {
                bytes,
                content_type,
            } => self.write_binary(bytes.clone(), content_type),
            InfosetEvent::EndElement => self.write_end_element(),
            InfosetEvent::EndDocument => self.write_end_document(),
        }
    }

    /// Write every event in order.
    pub fn write_events<'a, I>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a InfosetEvent>,
    {
        for event in events {
            self.write_event(event)?;
        }
        Ok(())
    }

    /// Emit the message and flush the sink. Drops the sink when it is owned.
    #[instrument(level = "debug", skip(self))]
    pub fn finish(&mut self) -> Result<()> {
        self.guarded(Self::emit)
    }

    /// Give back the sink, unless the writer owned it and already dropped it.
    pub fn into_inner(mut self) -> Option<W> {
        self.sink.take()
    }

    fn emit(&mut self) -> Result<()> {
        if !self.xml.is_complete() {
            if self.xml.depth() == 0 {
                return Err(Error::usage("document has no element"));
            }
            while self.xml.depth() > 0 {
                self.append_xml(XmlSerializer::end_element)?;
                self.quotas.release(QuotaCategory::Depth, 1);
            }
        }

        let mut root = Vec::with_capacity(self.xml.len());
        self.config.charset.encode_into(xml_text(self.xml.as_bytes())?, &mut root);

        let boundary = self.resolve_boundary(&root)?;

        let mut framing = Vec::new();
        if self.config.write_message_headers {
            let mut outer = Headers::new();
            outer.push(names::MIME_VERSION, "1.0");
            outer.push(
                names::CONTENT_TYPE,
                self.message_content_type(&boundary).to_string(),
            );
            outer.write_to(&mut framing)?;
        }
        write_delimiter(&mut framing, &boundary, true)?;
        self.root_headers().write_to(&mut framing)?;

        let mut attachment_framing = Vec::with_capacity(self.attachments.len());
        for attachment in &self.attachments {
            let mut head = Vec::new();
            write_delimiter(&mut head, &boundary, false)?;
            attachment_headers(attachment).write_to(&mut head)?;
            attachment_framing.push(head);
        }
        let mut close = Vec::new();
        write_close_delimiter(&mut close, &boundary)?;

        let overhead = framing.len()
            + attachment_framing.iter().map(Vec::len).sum::<usize>()
            + close.len();
        self.quotas
            .charge(QuotaCategory::MessageBytes, overhead as u64)?;

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::usage("sink already closed"))?;
        sink.write_all(&framing)?;
        sink.write_all(&root)?;
        for (attachment, head) in self.attachments.iter().zip(&attachment_framing) {
            sink.write_all(head)?;
            sink.write_all(&attachment.body)?;
        }
        sink.write_all(&close)?;
        sink.flush()?;

        self.stats.parts = 1 + self.attachments.len() as u64;
        self.stats.message_bytes = self.quotas.used(QuotaCategory::MessageBytes);
        debug!(
            parts = self.stats.parts,
            bytes = self.stats.message_bytes,
            inlined = self.stats.inlined_values,
            externalized = self.stats.externalized_values,
            "mtom message written"
        );

        if self.config.owns_stream {
            self.sink = None;
        }
        self.attachments.clear();
        self.state = WriterState::Finished;
        Ok(())
    }

    fn binary(&mut self, bytes: Bytes, content_type: &str) -> Result<()> {
        if self.xml.depth() == 0 {
            return Err(Error::usage("binary value written outside the document element"));
        }
        self.quotas
            .check(QuotaCategory::ArrayLength, bytes.len() as u64)?;

        if bytes.len() < self.config.inline_threshold {
            let encoded = STANDARD.encode(&bytes);
            self.append_xml(|xml| xml.raw_text(&encoded))?;
            self.stats.record_binary(bytes.len(), false);
            trace!(len = bytes.len(), "inlined binary value");
            return Ok(());
        }

        let content_type = normalize_content_type(content_type)?;
        self.quotas
            .check(QuotaCategory::PartBytes, bytes.len() as u64)?;
        self.quotas
            .charge(QuotaCategory::MessageBytes, bytes.len() as u64)?;

        let content_id = self.ids.next_content_id();
        let href = format!("{CID_SCHEME}{content_id}");
        self.append_xml(|xml| {
            xml.start_prefixed_element(XOP_PREFIX, XOP_INCLUDE, XOP_NAMESPACE)?;
            xml.attribute("href", "", &href)?;
            xml.end_element()
        })?;

        trace!(content_id = %content_id, len = bytes.len(), "externalized binary value");
        self.stats.record_binary(bytes.len(), true);
        self.attachments.push(Attachment {
            content_id,
            content_type,
            body: bytes,
        });
        Ok(())
    }

    fn resolve_boundary(&mut self, root: &[u8]) -> Result<String> {
        let boundary = match self.boundary.clone() {
            Some(boundary) => {
                if collides(&boundary, bodies(root, &self.attachments)) {
                    return Err(Error::BoundaryCollision { boundary });
                }
                boundary
            }
            None => self
                .ids
                .boundary_avoiding(bodies(root, &self.attachments)),
        };
        self.boundary = Some(boundary.clone());
        Ok(boundary)
    }

    fn message_content_type(&self, boundary: &str) -> ContentType {
        ContentType::new(MULTIPART_RELATED)
            .with_param("type", XOP_MEDIA_TYPE)
            .with_param("boundary", boundary)
            .with_param("start", format!("<{}>", self.start_id))
            .with_param("start-info", self.config.start_info.as_str())
    }

    fn root_headers(&self) -> Headers {
        let content_type = ContentType::new(XOP_MEDIA_TYPE)
            .with_param("charset", self.config.charset.label())
            .with_param("type", self.config.start_info.as_str());
        let mut headers = Headers::new();
        headers.push(names::CONTENT_TYPE, content_type.to_string());
        headers.push(names::CONTENT_TRANSFER_ENCODING, "binary");
        headers.push(names::CONTENT_ID, format!("<{}>", self.start_id));
        headers
    }

    /// Run `op` on the serializer and charge what it appended.
    fn append_xml<F>(&mut self, op: F) -> Result<()>
    where
        F: FnOnce(&mut XmlSerializer) -> Result<()>,
    {
        let before = self.xml.len();
        op(&mut self.xml)?;
        let added = self
            .config
            .charset
            .encoded_len(xml_text(&self.xml.as_bytes()[before..])?) as u64;
        self.quotas.charge(QuotaCategory::PartBytes, added)?;
        self.quotas.charge(QuotaCategory::MessageBytes, added)?;
        Ok(())
    }

    fn check_string(&self, value: &str) -> Result<()> {
        self.quotas
            .check(QuotaCategory::StringLength, value.chars().count() as u64)?;
        Ok(())
    }

    fn guarded<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        match self.state {
            WriterState::Open => {}
            WriterState::Finished => return Err(Error::usage("writer already finished")),
            WriterState::Failed => return Err(Error::usage("writer failed earlier")),
        }
        let result = op(self);
        if result.is_err() {
            self.state = WriterState::Failed;
        }
        result
    }
}

fn bodies<'a>(
    root: &'a [u8],
    attachments: &'a [Attachment],
) -> impl Iterator<Item = &'a [u8]> + Clone + 'a {
    std::iter::once(root).chain(attachments.iter().map(|a| &a.body[..]))
}

/// Serializer output is built from `&str` input, so this only fails on a bug.
fn xml_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::usage("serializer produced invalid UTF-8"))
}

fn attachment_headers(attachment: &Attachment) -> Headers {
    let mut headers = Headers::new();
    headers.push(names::CONTENT_TYPE, attachment.content_type.as_str());
    headers.push(names::CONTENT_TRANSFER_ENCODING, "binary");
    headers.push(names::CONTENT_ID, format!("<{}>", attachment.content_id));
    headers
}

fn normalize_content_type(content_type: &str) -> Result<String> {
    if content_type.trim().is_empty() {
        return Ok(OCTET_STREAM.to_owned());
    }
    let normalized = ContentType::parse(content_type)
        .map(|parsed| parsed.to_string())
        .ok_or_else(|| Error::usage(format!("invalid content type {content_type:?}")))?;
    // The value lands verbatim in a part header.
    if normalized.chars().any(char::is_control) {
        return Err(Error::usage(format!(
            "control character in content type {content_type:?}"
        )));
    }
    Ok(normalized)
}

fn reject_xop_namespace(namespace: &str) -> Result<()> {
    if namespace == XOP_NAMESPACE {
        return Err(Error::usage(
            "the XOP namespace is reserved for xop:Include placeholders",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xop::{ErrorKind, Quotas};

    fn config() -> WriterConfig {
        WriterConfig::default()
            .with_seed(42)
            .with_inline_threshold(16)
    }

    fn write_doc(writer: &mut MtomWriter<Vec<u8>>, payload: &[u8]) {
        writer.write_start_element("Envelope", "urn:soap").unwrap();
        writer.write_start_element("data", "").unwrap();
        writer
            .write_binary(payload.to_vec(), "application/octet-stream")
            .unwrap();
        writer.write_end_element().unwrap();
        writer.write_end_element().unwrap();
    }

    #[test]
    fn test_layout() {
        let mut writer = MtomWriter::new(Vec::new(), config().with_boundary("b0")).unwrap();
        write_doc(&mut writer, &[7u8; 32]);
        writer.finish().unwrap();
        let start = writer.start_id().to_owned();
        let out = String::from_utf8_lossy(&writer.into_inner().unwrap()).into_owned();

        assert!(out.starts_with("MIME-Version: 1.0\r\nContent-Type: multipart/related; type=\"application/xop+xml\"; boundary=\"b0\""));
        assert!(out.contains(&format!("start=\"<{start}>\"; start-info=\"application/soap+xml\"\r\n\r\n--b0\r\n")));
        assert!(out.contains("Content-Type: application/xop+xml; charset=utf-8; type=\"application/soap+xml\"\r\nContent-Transfer-Encoding: binary\r\n"));
        assert!(out.contains("<xop:Include xmlns:xop=\"http://www.w3.org/2004/08/xop/include\" href=\"cid:1."));
        assert!(out.contains("\r\n--b0\r\nContent-Type: application/octet-stream\r\n"));
        assert!(out.ends_with("\r\n--b0--\r\n"));
    }

    #[test]
    fn test_inline_below_threshold() {
        let mut writer = MtomWriter::new(Vec::new(), config()).unwrap();
        write_doc(&mut writer, b"hello");
        writer.finish().unwrap();
        assert_eq!(writer.stats().parts, 1);
        assert_eq!(writer.stats().inlined_values, 1);
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(out.contains("<data xmlns=\"\">aGVsbG8=</data>"));
    }

    #[test]
    fn test_without_message_headers() {
        let config = config().with_boundary("outer").with_message_headers(false);
        let mut writer = MtomWriter::new(Vec::new(), config).unwrap();
        write_doc(&mut writer, b"x");
        writer.finish().unwrap();
        let out = writer.into_inner().unwrap();
        assert!(out.starts_with(b"--outer\r\nContent-Type: application/xop+xml"));
    }

    #[test]
    fn test_owned_sink_is_dropped() {
        let mut writer =
            MtomWriter::new(Vec::new(), config().with_owns_stream(true)).unwrap();
        write_doc(&mut writer, b"x");
        writer.finish().unwrap();
        assert!(writer.into_inner().is_none());
    }

    #[test]
    fn test_write_after_finish() {
        let mut writer = MtomWriter::new(Vec::new(), config()).unwrap();
        write_doc(&mut writer, b"x");
        writer.finish().unwrap();
        let err = writer.write_text("late").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolUsage);
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_supplied_boundary_collision() {
        let mut writer = MtomWriter::new(Vec::new(), config().with_boundary("clash")).unwrap();
        write_doc(&mut writer, b"0123456789 --clash 0123456789");
        assert!(matches!(
            writer.finish(),
            Err(Error::BoundaryCollision { .. })
        ));
    }

    #[test]
    fn test_quota_poisons_writer() {
        let quotas = Quotas::unbounded().with_max_message_size(64);
        let mut writer = MtomWriter::new(Vec::new(), config().with_quotas(quotas)).unwrap();
        writer.write_start_element("a", "").unwrap();
        let err = writer.write_binary(vec![0u8; 128], "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(
            writer.write_end_element().unwrap_err().kind(),
            ErrorKind::ProtocolUsage
        );
    }

    #[test]
    fn test_content_type_header_injection_rejected() {
        let mut writer = MtomWriter::new(Vec::new(), config()).unwrap();
        writer.write_start_element("a", "").unwrap();
        let err = writer
            .write_binary(vec![1u8; 64], "image/png; x=\"1\r\nContent-ID: <evil>\"")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolUsage);
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_content_type_normalized() {
        assert_eq!(
            normalize_content_type("Image/PNG; Name=a.png").unwrap(),
            "image/png; name=\"a.png\""
        );
        assert_eq!(normalize_content_type(" ").unwrap(), OCTET_STREAM);
        assert!(normalize_content_type("text/plain; x=\"a\tb\"").is_err());
    }

    #[test]
    fn test_xop_namespace_reserved() {
        let mut writer = MtomWriter::new(Vec::new(), config()).unwrap();
        writer.write_start_element("a", "").unwrap();
        let err = writer
            .write_start_element("Other", XOP_NAMESPACE)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolUsage);

        let mut writer = MtomWriter::new(Vec::new(), config()).unwrap();
        writer.write_start_element("a", "").unwrap();
        let err = writer
            .write_attribute("href", XOP_NAMESPACE, "cid:x")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolUsage);
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let mut writer = MtomWriter::new(Vec::new(), config()).unwrap();
        writer.write_start_element("a", "").unwrap();
        writer.write_attribute("id", "", "1").unwrap();
        let err = writer.write_attribute("id", "", "2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolUsage);
    }

    #[test]
    fn test_writer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<MtomWriter<Vec<u8>>>();
    }

    #[test]
    fn test_empty_document_rejected() {
        let mut writer = MtomWriter::new(Vec::new(), config()).unwrap();
        assert_eq!(writer.finish().unwrap_err().kind(), ErrorKind::ProtocolUsage);
    }
}
