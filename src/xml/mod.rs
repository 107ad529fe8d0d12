//! XML serialization and parsing for the root part
//!
//! Both directions run on `quick-xml` events. This module adds the
//! namespace bookkeeping the infoset needs: default-namespace and prefix
//! declarations on write, expanded names and duplicate checks on read.
//! Comments, processing instructions and CDATA are accepted on input;
//! DTDs are rejected.

mod reader;
mod writer;

pub use reader::{XmlNode, XmlPullParser};
pub use writer::XmlSerializer;

/// Namespace bound to the `xml` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace of namespace declarations
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Whether `ch` may appear in an XML 1.0 document.
#[must_use]
pub fn is_xml_char(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\r' | '\u{20}'..='\u{d7ff}' | '\u{e000}'..='\u{fffd}' | '\u{10000}'..='\u{10ffff}')
}

/// Whether `name` is a valid non-colonized XML name.
#[must_use]
pub fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    is_name_start(first) && chars.all(is_name_char)
}

fn is_name_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || (!ch.is_ascii() && ch.is_alphanumeric())
}

fn is_name_char(ch: char) -> bool {
    is_name_start(ch) || ch.is_ascii_digit() || ch == '-' || ch == '.' || (!ch.is_ascii() && is_xml_char(ch) && !ch.is_whitespace())
}
