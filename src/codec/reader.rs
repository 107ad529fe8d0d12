//! MTOM reader: multipart/related bytes in, infoset events out.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use super::config::ReaderConfig;
use crate::mime::{ContentType, Headers, MimePart, names, parse_content_id, split};
use crate::xml::{XmlNode, XmlPullParser};
use crate::xop::{
    CID_SCHEME, Charset, Error, InfosetEvent, MULTIPART_RELATED, MalformedKind, MessageStats,
    QuotaCategory, QuotaEnforcer, Result, XOP_INCLUDE, XOP_MEDIA_TYPE, XOP_NAMESPACE,
};

/// Callback told how many bytes of the window the message occupied.
pub type CloseCallback = Box<dyn FnOnce(usize) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Reading,
    Finished,
    Failed,
}

/// Parses one MTOM message and yields its infoset.
///
/// The MIME structure is split eagerly when the reader is built; the root
/// XML is parsed lazily as events are pulled. Attachment bytes are views
/// into the input buffer, which stays alive as long as any of them does.
pub struct MtomReader {
    parser: XmlPullParser,
    attachments: HashMap<String, MimePart>,
    referenced: HashSet<String>,
    pending: VecDeque<InfosetEvent>,
    quotas: QuotaEnforcer,
    stats: MessageStats,
    root_id: String,
    root_offset: usize,
    start_info: Option<String>,
    charset: Charset,
    consumed: usize,
    on_close: Option<CloseCallback>,
    state: ReaderState,
}

impl MtomReader {
    /// Read the message in `buffer[offset..offset + count]`.
    #[instrument(level = "debug", skip(buffer, config), fields(len = buffer.len()))]
    pub fn new(buffer: Bytes, offset: usize, count: usize, config: ReaderConfig) -> Result<Self> {
        let end = offset
            .checked_add(count)
            .filter(|&end| end <= buffer.len())
            .ok_or_else(|| {
                Error::usage(format!(
                    "window {offset}+{count} exceeds buffer of {} bytes",
                    buffer.len()
                ))
            })?;
        let window = buffer.slice(offset..end);
        let mut quotas = QuotaEnforcer::new(config.quotas);

        let (content_type, body_start) = message_content_type(&window, config.content_type.as_deref())?;
        quotas.charge(QuotaCategory::MessageBytes, body_start as u64)?;

        let boundary = match &content_type {
            Some(content_type) => {
                if !content_type.is(MULTIPART_RELATED) {
                    return Err(Error::malformed(
                        MalformedKind::InvalidContentType(content_type.to_string()),
                        0,
                    ));
                }
                if let Some(kind) = content_type.param("type") {
                    if !kind.eq_ignore_ascii_case(XOP_MEDIA_TYPE) {
                        return Err(Error::malformed(
                            MalformedKind::InvalidContentType(content_type.to_string()),
                            0,
                        ));
                    }
                }
                content_type
                    .param("boundary")
                    .ok_or_else(|| Error::malformed(MalformedKind::MissingBoundary, 0))?
                    .to_owned()
            }
            None => infer_boundary(&window)?,
        };

        let multipart = split(&window, body_start, &boundary, &mut quotas)?;
        let mut parts = multipart
            .parts
            .into_iter()
            .map(MimePart::from_raw)
            .collect::<Result<Vec<_>>>()?;

        let start = config.start_uri.clone().or_else(|| {
            content_type
                .as_ref()
                .and_then(|ct| ct.param("start"))
                .map(|start| parse_content_id(start).to_owned())
        });
        let root_index = match &start {
            Some(start) => parts
                .iter()
                .position(|part| part.content_id == *start)
                .ok_or_else(|| {
                    Error::malformed(MalformedKind::RootNotFound, body_start)
                })?,
            None if parts.is_empty() => {
                return Err(Error::malformed(MalformedKind::RootNotFound, body_start));
            }
            None => 0,
        };
        let root = parts.remove(root_index);

        if !root.content_type.is(XOP_MEDIA_TYPE) {
            return Err(Error::malformed_part(
                MalformedKind::InvalidContentType(root.content_type.to_string()),
                root.offset,
                &root.content_id,
            ));
        }
        let charset = select_charset(&root, &config.encodings)?.sniff(&root.body);
        let text = charset.decode(&root.body).ok_or_else(|| {
            Error::malformed_part(
                MalformedKind::InvalidXml(format!("root part is not valid {charset}")),
                root.offset,
                &root.content_id,
            )
        })?;

        let mut attachments = HashMap::with_capacity(parts.len());
        for part in parts {
            if part.content_id.is_empty() {
                return Err(Error::malformed(MalformedKind::OrphanPart, part.offset));
            }
            if part.content_id == root.content_id || attachments.contains_key(&part.content_id) {
                return Err(Error::malformed_part(
                    MalformedKind::DuplicateContentId,
                    part.offset,
                    &part.content_id,
                ));
            }
            attachments.insert(part.content_id.clone(), part);
        }

        let stats = MessageStats {
            parts: 1 + attachments.len() as u64,
            message_bytes: multipart.consumed as u64,
            ..MessageStats::default()
        };
        debug!(
            parts = stats.parts,
            consumed = multipart.consumed,
            %charset,
            root = %root.content_id,
            "mtom message split"
        );

        Ok(Self {
            parser: XmlPullParser::new(text, root.offset),
            attachments,
            referenced: HashSet::new(),
            pending: VecDeque::new(),
            quotas,
            stats,
            root_id: root.content_id,
            root_offset: root.offset,
            start_info: root.content_type.param("type").map(str::to_owned),
            charset,
            consumed: multipart.consumed,
            on_close: None,
            state: ReaderState::Reading,
        })
    }

    /// Register a callback run once the end of the document is reached.
    #[must_use]
    pub fn on_close(mut self, callback: impl FnOnce(usize) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Content-ID of the root part.
    #[must_use]
    pub fn root_content_id(&self) -> &str {
        &self.root_id
    }

    /// `type` parameter of the root part.
    #[must_use]
    pub fn start_info(&self) -> Option<&str> {
        self.start_info.as_deref()
    }

    /// Encoding the root part was decoded with.
    #[must_use]
    pub const fn charset(&self) -> Charset {
        self.charset
    }

    /// Bytes of the window occupied by the message, through the closing delimiter.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.consumed
    }

    /// Attachment parts by content-id.
    #[must_use]
    pub fn attachment(&self, content_id: &str) -> Option<&MimePart> {
        self.attachments.get(content_id)
    }

    /// Number of attachment parts.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Counters for this message.
    #[must_use]
    pub const fn stats(&self) -> &MessageStats {
        &self.stats
    }

    /// Next infoset event; `None` after [`InfosetEvent::EndDocument`].
    pub fn next_event(&mut self) -> Result<Option<InfosetEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        match self.state {
            ReaderState::Reading => {}
            ReaderState::Finished => return Ok(None),
            ReaderState::Failed => return Err(Error::usage("reader failed earlier")),
        }

        let result = self.advance();
        if result.is_err() {
            self.state = ReaderState::Failed;
            self.pending.clear();
        }
        result
    }

    /// Read every remaining event.
    pub fn read_to_end(&mut self) -> Result<Vec<InfosetEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    fn advance(&mut self) -> Result<Option<InfosetEvent>> {
        let Some(node) = self.parser.next_node()? else {
            return self.finish().map(Some);
        };

        let event = match node {
            XmlNode::Start {
                name,
                namespace,
                attributes,
            } => {
                self.quotas.charge(QuotaCategory::Depth, 1)?;
                if namespace == XOP_NAMESPACE {
                    return self.include(&name, &attributes).map(Some);
                }
                for (name, namespace, value) in attributes {
                    self.check_string(&value)?;
                    self.pending.push_back(InfosetEvent::Attribute {
                        name,
                        namespace,
                        value,
                    });
                }
                InfosetEvent::StartElement { name, namespace }
            }
            XmlNode::End => {
                self.quotas.release(QuotaCategory::Depth, 1);
                InfosetEvent::EndElement
            }
            XmlNode::Text(value) => {
                self.check_string(&value)?;
                InfosetEvent::Text { value }
            }
        };
        Ok(Some(event))
    }

    fn include(
        &mut self,
        name: &str,
        attributes: &[(String, String, String)],
    ) -> Result<InfosetEvent> {
        let offset = self.root_offset;
        if name != XOP_INCLUDE {
            return Err(Error::malformed_part(
                MalformedKind::InvalidInclude("unknown element in the XOP namespace"),
                offset,
                &self.root_id,
            ));
        }
        let href = attributes
            .iter()
            .find(|(name, namespace, _)| name == "href" && namespace.is_empty())
            .map(|(_, _, value)| value.as_str())
            .ok_or_else(|| {
                Error::malformed_part(
                    MalformedKind::InvalidInclude("missing href"),
                    offset,
                    &self.root_id,
                )
            })?;
        if self.parser.next_node()? != Some(XmlNode::End) {
            return Err(Error::malformed_part(
                MalformedKind::InvalidInclude("xop:Include must be empty"),
                offset,
                &self.root_id,
            ));
        }
        self.quotas.release(QuotaCategory::Depth, 1);

        let unresolved = || {
            Error::malformed_part(
                MalformedKind::UnresolvedInclude {
                    href: href.to_owned(),
                },
                offset,
                &self.root_id,
            )
        };
        let content_id = strip_cid(href).ok_or_else(unresolved)?;
        let part = self.attachments.get(&content_id).ok_or_else(unresolved)?;
        if !self.referenced.insert(content_id.clone()) {
            return Err(Error::malformed_part(
                MalformedKind::DuplicateInclude,
                part.offset,
                &content_id,
            ));
        }
        self.quotas
            .check(QuotaCategory::ArrayLength, part.len() as u64)?;

        trace!(content_id = %content_id, len = part.len(), "resolved xop:Include");
        self.stats.record_binary(part.len(), true);
        Ok(InfosetEvent::BinaryValue {
            bytes: part.body.clone(),
            content_type: part.content_type.to_string(),
        })
    }

    fn finish(&mut self) -> Result<InfosetEvent> {
        if let Some(orphan) = self
            .attachments
            .values()
            .filter(|part| !self.referenced.contains(&part.content_id))
            .min_by_key(|part| part.offset)
        {
            return Err(Error::malformed_part(
                MalformedKind::OrphanPart,
                orphan.offset,
                &orphan.content_id,
            ));
        }

        self.state = ReaderState::Finished;
        debug!(consumed = self.consumed, "mtom message read");
        if let Some(callback) = self.on_close.take() {
            callback(self.consumed);
        }
        Ok(InfosetEvent::EndDocument)
    }

    fn check_string(&self, value: &str) -> Result<()> {
        self.quotas
            .check(QuotaCategory::StringLength, value.chars().count() as u64)?;
        Ok(())
    }
}

impl Iterator for MtomReader {
    type Item = Result<InfosetEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ReaderState::Failed {
            return None;
        }
        self.next_event().transpose()
    }
}

impl std::fmt::Debug for MtomReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtomReader")
            .field("root_id", &self.root_id)
            .field("charset", &self.charset)
            .field("attachments", &self.attachments.len())
            .field("consumed", &self.consumed)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Outer content type and where the multipart body starts.
fn message_content_type(
    window: &Bytes,
    supplied: Option<&str>,
) -> Result<(Option<ContentType>, usize)> {
    if let Some(value) = supplied {
        let parsed = ContentType::parse(value).ok_or_else(|| {
            Error::malformed(MalformedKind::InvalidContentType(value.to_owned()), 0)
        })?;
        return Ok((Some(parsed), 0));
    }
    if window.starts_with(b"--") || window.starts_with(b"\r\n--") {
        return Ok((None, 0));
    }

    let (headers, body_start) = Headers::parse(window, 0)?;
    let value = headers
        .get(names::CONTENT_TYPE)
        .ok_or_else(|| Error::malformed(MalformedKind::MissingBoundary, 0))?;
    let parsed = ContentType::parse(value)
        .ok_or_else(|| Error::malformed(MalformedKind::InvalidContentType(value.to_owned()), 0))?;
    Ok((Some(parsed), body_start))
}

/// Boundary taken from the first delimiter line when no headers are present.
fn infer_boundary(window: &[u8]) -> Result<String> {
    let line_start = if window.starts_with(b"\r\n") { 2 } else { 0 };
    let line = &window[line_start..];
    let end = line
        .windows(2)
        .position(|pair| pair == b"\r\n")
        .ok_or_else(|| Error::malformed(MalformedKind::MissingBoundary, line_start))?;
    let token = std::str::from_utf8(&line[2..end])
        .map_err(|_| Error::malformed(MalformedKind::MissingBoundary, line_start))?
        .trim_end_matches([' ', '\t']);
    if token.is_empty() {
        return Err(Error::malformed(MalformedKind::MissingBoundary, line_start));
    }
    Ok(token.to_owned())
}

/// First accepted encoding matching the root part's declared charset.
fn select_charset(root: &MimePart, accepted: &[Charset]) -> Result<Charset> {
    let unsupported = |label: &str| {
        Error::malformed_part(
            MalformedKind::UnsupportedEncoding(label.to_owned()),
            root.offset,
            &root.content_id,
        )
    };
    match (root.content_type.param("charset"), accepted) {
        (Some(label), []) => Charset::from_label(label).ok_or_else(|| unsupported(label)),
        (Some(label), accepted) => accepted
            .iter()
            .copied()
            .find(|charset| charset.matches_label(label))
            .ok_or_else(|| unsupported(label)),
        (None, []) => Ok(Charset::Utf8),
        (None, [first, ..]) => Ok(*first),
    }
}

/// Content-id named by a `cid:` URL, percent-decoded.
fn strip_cid(href: &str) -> Option<String> {
    let href = href.trim();
    let scheme = href.get(..CID_SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(CID_SCHEME) {
        return None;
    }
    percent_decode(&href[CID_SCHEME.len()..])
}

fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = bytes.get(idx + 1..idx + 3)?;
            let high = char::from(hex[0]).to_digit(16)?;
            let low = char::from(hex[1]).to_digit(16)?;
            out.push(u8::try_from(high * 16 + low).ok()?);
            idx += 3;
        } else {
            out.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xop::{ErrorKind, Quotas};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MESSAGE: &str = "Content-Type: multipart/related; type=\"application/xop+xml\"; boundary=\"b\"; start=\"<root@x>\"\r\n\
\r\n\
--b\r\n\
Content-Type: application/xop+xml; charset=utf-8; type=\"text/xml\"\r\n\
Content-ID: <root@x>\r\n\
\r\n\
<doc xmlns=\"urn:d\" id=\"7\"><img><xop:Include xmlns:xop=\"http://www.w3.org/2004/08/xop/include\" href=\"cid:img%40x\"/></img></doc>\r\n\
--b\r\n\
Content-Type: image/png\r\n\
Content-ID: <img@x>\r\n\
\r\n\
PNGDATA\r\n\
--b--\r\n";

    fn reader(message: &str, config: ReaderConfig) -> Result<MtomReader> {
        let bytes = Bytes::copy_from_slice(message.as_bytes());
        let len = bytes.len();
        MtomReader::new(bytes, 0, len, config)
    }

    #[test]
    fn test_reads_events() {
        let mut reader = reader(MESSAGE, ReaderConfig::default()).unwrap();
        assert_eq!(reader.root_content_id(), "root@x");
        assert_eq!(reader.start_info(), Some("text/xml"));

        let events = reader.read_to_end().unwrap();
        assert_eq!(
            events,
            vec![
                InfosetEvent::start("doc", "urn:d"),
                InfosetEvent::attribute("id", "7"),
                InfosetEvent::start("img", "urn:d"),
                InfosetEvent::BinaryValue {
                    bytes: Bytes::from_static(b"PNGDATA"),
                    content_type: "image/png".into(),
                },
                InfosetEvent::EndElement,
                InfosetEvent::EndElement,
                InfosetEvent::EndDocument,
            ]
        );
        assert_eq!(reader.next_event().unwrap(), None);
        assert_eq!(reader.stats().externalized_values, 1);
    }

    #[test]
    fn test_close_callback_gets_consumed() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let padded = format!("{MESSAGE}trailing epilogue");
        let mut reader = reader(&padded, ReaderConfig::default())
            .unwrap()
            .on_close(move |consumed| sink.store(consumed, Ordering::SeqCst));
        reader.read_to_end().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), MESSAGE.len());
    }

    #[test]
    fn test_window_offset() {
        let mut buffer = b"junk".to_vec();
        buffer.extend_from_slice(MESSAGE.as_bytes());
        let reader = MtomReader::new(Bytes::from(buffer), 4, MESSAGE.len(), ReaderConfig::default());
        assert!(reader.is_ok());

        let err = MtomReader::new(Bytes::from_static(b"abc"), 2, 5, ReaderConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolUsage);
    }

    #[test]
    fn test_unknown_content_id() {
        let message = MESSAGE.replace("cid:img%40x", "cid:missing@x");
        let mut reader = reader(&message, ReaderConfig::default()).unwrap();
        let err = reader.read_to_end().unwrap_err();
        assert!(matches!(
            err.malformed_kind(),
            Some(MalformedKind::UnresolvedInclude { href }) if href == "cid:missing@x"
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_orphan_part() {
        let message = MESSAGE.replace(
            "<xop:Include xmlns:xop=\"http://www.w3.org/2004/08/xop/include\" href=\"cid:img%40x\"/>",
            "",
        );
        let err = reader(&message, ReaderConfig::default())
            .unwrap()
            .read_to_end()
            .unwrap_err();
        assert_eq!(err.malformed_kind(), Some(&MalformedKind::OrphanPart));
    }

    #[test]
    fn test_encoding_candidates() {
        let err = reader(
            MESSAGE,
            ReaderConfig::default().with_encodings([Charset::Utf16Le]),
        )
        .unwrap_err();
        assert_eq!(
            err.malformed_kind(),
            Some(&MalformedKind::UnsupportedEncoding("utf-8".into()))
        );

        let reader = reader(
            MESSAGE,
            ReaderConfig::default().with_encodings([Charset::Utf16Le, Charset::Utf8]),
        )
        .unwrap();
        assert_eq!(reader.charset(), Charset::Utf8);
    }

    #[test]
    fn test_headerless_message() {
        let body = MESSAGE.split_once("\r\n\r\n").unwrap().1;
        let mut reader = reader(body, ReaderConfig::default()).unwrap();
        assert_eq!(reader.root_content_id(), "root@x");
        assert_eq!(reader.read_to_end().unwrap().len(), 7);

        let reader = reader_with_type(body);
        assert_eq!(reader.root_content_id(), "root@x");
    }

    fn reader_with_type(body: &str) -> MtomReader {
        let config = ReaderConfig::default()
            .with_content_type("multipart/related; boundary=b; type=\"application/xop+xml\"");
        reader(body, config).unwrap()
    }

    #[test]
    fn test_string_quota() {
        let config = ReaderConfig::default().with_quotas(Quotas::unbounded().with_max_string_length(0));
        let err = reader(MESSAGE, config).unwrap().read_to_end().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_wrong_root_type() {
        let message = MESSAGE.replace("application/xop+xml; charset", "text/xml; charset");
        let err = reader(&message, ReaderConfig::default()).unwrap_err();
        assert!(matches!(
            err.malformed_kind(),
            Some(MalformedKind::InvalidContentType(_))
        ));
    }

    #[test]
    fn test_strip_cid() {
        assert_eq!(strip_cid("cid:a%40b").as_deref(), Some("a@b"));
        assert_eq!(strip_cid("CID:x@y").as_deref(), Some("x@y"));
        assert_eq!(strip_cid("http://x"), None);
        assert_eq!(strip_cid("cid:%zz"), None);
        assert_eq!(strip_cid("cid:%+1"), None);
        assert_eq!(strip_cid("cid:a%4"), None);
    }

    #[test]
    fn test_reader_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<MtomReader>();
    }
}
