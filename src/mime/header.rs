//! MIME header blocks and the `Content-Type` / `Content-ID` values inside them.

use std::fmt;
use std::io::{self, Write};

use super::find;
use crate::xop::{Error, MalformedKind, Result};

/// Ordered header fields of one MIME entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty header block.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Parse a header block starting at `start`.
    ///
    /// Returns the headers and the offset of the first body byte (just past
    /// the blank line). Folded continuation lines are unfolded.
    pub fn parse(data: &[u8], start: usize) -> Result<(Self, usize)> {
        if data[start..].starts_with(b"\r\n") {
            return Ok((Self::new(), start + 2));
        }

        let end = find(data, b"\r\n\r\n", start)
            .ok_or_else(|| Error::malformed(MalformedKind::Truncated, data.len()))?;
        let block = std::str::from_utf8(&data[start..end]).map_err(|_| {
            Error::malformed(
                MalformedKind::InvalidHeader("non-ASCII header bytes".into()),
                start,
            )
        })?;

        let mut headers = Self::new();
        let mut offset = start;
        for line in block.split("\r\n") {
            if line.starts_with([' ', '\t']) {
                let Some((_, value)) = headers.entries.last_mut() else {
                    return Err(Error::malformed(
                        MalformedKind::InvalidHeader("continuation without header".into()),
                        offset,
                    ));
                };
                value.push(' ');
                value.push_str(line.trim());
            } else {
                let Some((name, value)) = line.split_once(':') else {
                    return Err(Error::malformed(
                        MalformedKind::InvalidHeader(line.to_owned()),
                        offset,
                    ));
                };
                let name = name.trim();
                if name.is_empty() || name.contains([' ', '\t']) {
                    return Err(Error::malformed(
                        MalformedKind::InvalidHeader(line.to_owned()),
                        offset,
                    ));
                }
                headers.push(name, value.trim());
            }
            offset += line.len() + 2;
        }

        Ok((headers, end + 4))
    }

    /// Append a field.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value of `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every field followed by the blank line.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (name, value) in &self.entries {
            write!(out, "{name}: {value}\r\n")?;
        }
        out.write_all(b"\r\n")
    }
}

/// Parsed `Content-Type` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    media_type: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Content type without parameters.
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into().to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Parse `type/subtype; name=value; name="quoted value"`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (media_type, mut rest) = match value.find(';') {
            Some(idx) => (&value[..idx], &value[idx..]),
            None => (value, ""),
        };
        let media_type = media_type.trim();
        let (kind, subtype) = media_type.split_once('/')?;
        if !is_token(kind) || !is_token(subtype) {
            return None;
        }

        let mut content_type = Self::new(media_type);
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            rest = rest.strip_prefix(';')?.trim_start();
            if rest.is_empty() {
                break;
            }
            let eq = rest.find('=')?;
            let name = rest[..eq].trim();
            if !is_token(name) {
                return None;
            }
            rest = rest[eq + 1..].trim_start();
            let (param, remaining) = if let Some(quoted) = rest.strip_prefix('"') {
                parse_quoted(quoted)?
            } else {
                let end = rest.find([';', ' ', '\t']).unwrap_or(rest.len());
                (rest[..end].to_owned(), &rest[end..])
            };
            content_type.params.push((name.to_ascii_lowercase(), param));
            rest = remaining;
        }

        Some(content_type)
    }

    /// Parameter value by case-insensitive name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the media type equals `media_type`, ignoring case.
    #[must_use]
    pub fn is(&self, media_type: &str) -> bool {
        self.media_type.eq_ignore_ascii_case(media_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (name, value) in &self.params {
            if !value.is_empty() && is_token(value) && name.eq_ignore_ascii_case("charset") {
                write!(f, "; {name}={value}")?;
            } else {
                write!(f, "; {name}=\"")?;
                for ch in value.chars() {
                    if ch == '"' || ch == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{ch}")?;
                }
                f.write_str("\"")?;
            }
        }
        Ok(())
    }
}

/// Strip angle brackets and whitespace from a `Content-ID` or `start` value.
#[must_use]
pub fn parse_content_id(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('<')
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(value)
        .trim()
}

fn parse_quoted(input: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => value.push(chars.next()?.1),
            '"' => return Some((value, &input[idx + 1..])),
            _ => value.push(ch),
        }
    }
    None
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b)
        })
}
