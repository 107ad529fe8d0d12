//! Character encodings accepted for the root XML part.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Supported character encodings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Charset {
    /// UTF-8
    #[default]
    Utf8,
    /// UTF-16, little-endian
    Utf16Le,
    /// UTF-16, big-endian
    Utf16Be,
}

impl Charset {
    /// Parse a charset label, case-insensitively.
    ///
    /// Bare `utf-16` maps to big-endian; [`Charset::sniff`] refines it from a BOM.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches('"');
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "utf-16le" | "unicodefffe" => Some(Self::Utf16Le),
            "utf-16be" | "utf-16" | "utf16" => Some(Self::Utf16Be),
            _ => None,
        }
    }

    /// Label written into `charset=` parameters.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16LE",
            Self::Utf16Be => "utf-16BE",
        }
    }

    /// Whether a declared label names this charset.
    ///
    /// Bare `utf-16` matches both byte orders.
    #[must_use]
    pub fn matches_label(self, label: &str) -> bool {
        let lowered = label.trim().trim_matches('"').to_ascii_lowercase();
        if matches!(lowered.as_str(), "utf-16" | "utf16") {
            return matches!(self, Self::Utf16Le | Self::Utf16Be);
        }
        Self::from_label(&lowered) == Some(self)
    }

    /// Refine the byte order from a BOM at the start of `body`.
    #[must_use]
    pub fn sniff(self, body: &[u8]) -> Self {
        match (self, body) {
            (Self::Utf16Le | Self::Utf16Be, [0xff, 0xfe, ..]) => Self::Utf16Le,
            (Self::Utf16Le | Self::Utf16Be, [0xfe, 0xff, ..]) => Self::Utf16Be,
            _ => self,
        }
    }

    /// Encode `text` into `out`. No BOM is written.
    pub fn encode_into(self, text: &str, out: &mut Vec<u8>) {
        match self {
            Self::Utf8 => out.extend_from_slice(text.as_bytes()),
            Self::Utf16Le => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            Self::Utf16Be => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
        }
    }

    /// Byte length of `text` once encoded.
    #[must_use]
    pub fn encoded_len(self, text: &str) -> usize {
        match self {
            Self::Utf8 => text.len(),
            Self::Utf16Le | Self::Utf16Be => text.encode_utf16().count() * 2,
        }
    }

    /// Decode `body`, skipping a leading BOM. `None` on invalid input.
    #[must_use]
    pub fn decode(self, body: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => {
                let body = body.strip_prefix(b"\xef\xbb\xbf").unwrap_or(body);
                std::str::from_utf8(body).ok().map(str::to_owned)
            }
            Self::Utf16Le | Self::Utf16Be => {
                if body.len() % 2 != 0 {
                    return None;
                }
                let units = body.chunks_exact(2).map(|pair| {
                    let pair = [pair[0], pair[1]];
                    if self == Self::Utf16Le {
                        u16::from_le_bytes(pair)
                    } else {
                        u16::from_be_bytes(pair)
                    }
                });
                let text: String = char::decode_utf16(units).collect::<Result<_, _>>().ok()?;
                if text.starts_with('\u{feff}') {
                    Some(text['\u{feff}'.len_utf8()..].to_owned())
                } else {
                    Some(text)
                }
            }
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
