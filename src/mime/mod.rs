//! MIME multipart/related plumbing
//!
//! Header parsing and emission, part splitting, and the part model used by
//! the MTOM codec.

mod header;
mod multipart;
mod part;

pub use header::{ContentType, Headers, parse_content_id};
pub use multipart::{Multipart, RawPart, split};
pub(crate) use multipart::{write_close_delimiter, write_delimiter};
pub use part::{MimePart, TransferEncoding};

/// Line terminator for headers and delimiters
pub const CRLF: &[u8] = b"\r\n";

/// Header names used by the codec
pub mod names {
    /// `Content-Type`
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// `Content-ID`
    pub const CONTENT_ID: &str = "Content-ID";
    /// `Content-Transfer-Encoding`
    pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
    /// `MIME-Version`
    pub const MIME_VERSION: &str = "MIME-Version";
}

/// Position of `needle` in `haystack` at or after `from`.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    if needle.is_empty() {
        return Some(from);
    }
    let first = needle[0];
    let mut cursor = from;
    while cursor + needle.len() <= haystack.len() {
        let step = haystack[cursor..].iter().position(|&b| b == first)?;
        cursor += step;
        if haystack[cursor..].starts_with(needle) {
            return Some(cursor);
        }
        cursor += 1;
    }
    None
}
