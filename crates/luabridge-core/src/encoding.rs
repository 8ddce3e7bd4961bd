//! Text encodings used when moving strings across the boundary
//!
//! Lua strings are byte strings. Whether a given byte string is "text" is a
//! property of the encoding the host chooses to read it with, so every
//! string read or write names an encoding, falling back to the instance's
//! default.

use std::fmt;

/// Encodings the bridge can decode and encode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StringEncoding {
    /// UTF-8 (the default)
    #[default]
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value
    Latin1,
    /// 7-bit ASCII
    Ascii,
}

impl StringEncoding {
    /// Decode bytes, returning `None` if they are not valid in this encoding.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            StringEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            StringEncoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            StringEncoding::Ascii => {
                if bytes.is_ascii() {
                    // ASCII is a subset of UTF-8
                    Some(String::from_utf8_lossy(bytes).into_owned())
                } else {
                    None
                }
            }
        }
    }

    /// Encode text. Characters this encoding cannot represent become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            StringEncoding::Utf8 => text.as_bytes().to_vec(),
            StringEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            StringEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }

    /// Check whether `text` survives `encode` unchanged
    pub fn can_encode(self, text: &str) -> bool {
        match self {
            StringEncoding::Utf8 => true,
            StringEncoding::Latin1 => text.chars().all(|c| u32::from(c) <= 0xFF),
            StringEncoding::Ascii => text.is_ascii(),
        }
    }

    /// Parse an encoding name as accepted on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(StringEncoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Some(StringEncoding::Latin1),
            "ascii" | "us-ascii" => Some(StringEncoding::Ascii),
            _ => None,
        }
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringEncoding::Utf8 => write!(f, "utf-8"),
            StringEncoding::Latin1 => write!(f, "latin-1"),
            StringEncoding::Ascii => write!(f, "ascii"),
        }
    }
}
