use std::num::ParseIntError;

use derive_more::derive::{Deref, Display, Into};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[allow(clippy::unwrap_used)]
static SIZE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)([KMG])?$").unwrap());

/// Byte count of a histogram boundary such as `512`, `1K`, `2M` or `1G` (binary units).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Into, Display, Serialize)]
pub struct ByteSize(pub i64);

impl ByteSize {
    pub const KIB: i64 = 1024;
    pub const MIB: i64 = 1024 * 1024;
    pub const GIB: i64 = 1024 * 1024 * 1024;

    pub fn as_bytes(&self) -> i64 {
        self.0
    }

    pub fn parse(token: &str) -> Result<ByteSize, SizeTokenError> {
        use SizeTokenError::*;
        let token = token.trim();
        if token.is_empty() {
            return Err(Empty);
        }
        let Some(captures) = SIZE_TOKEN.captures(token) else {
            return Err(Malformed(token.to_owned()));
        };
        let scalar: i64 = captures[1].parse()?;
        let multiplier = match captures.get(2).map(|unit| unit.as_str()) {
            Some("K") => Self::KIB,
            Some("M") => Self::MIB,
            Some("G") => Self::GIB,
            _ => 1,
        };
        scalar
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| Overflow(token.to_owned()))
    }

    /// Lenient variant of [`ByteSize::parse`]: a malformed token counts as zero bytes so that one
    /// odd histogram boundary does not abort a whole log file.
    pub fn from_token(token: &str) -> ByteSize {
        Self::parse(token).unwrap_or_else(|e| {
            debug!("size token {token:?} treated as 0 bytes: {e}");
            ByteSize(0)
        })
    }

    /// Shortest token that parses back to the same byte count (`1024` -> `1K`).
    pub fn to_token(&self) -> String {
        match self.0 {
            0 => "0".to_owned(),
            n if n % Self::GIB == 0 => format!("{}G", n / Self::GIB),
            n if n % Self::MIB == 0 => format!("{}M", n / Self::MIB),
            n if n % Self::KIB == 0 => format!("{}K", n / Self::KIB),
            n => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeTokenError {
    #[error("trying to parse an empty size token")]
    Empty,
    #[error("`{0}` is not a size token (<digits>[K|M|G])")]
    Malformed(String),
    #[error("scalar part is not an integer")]
    InvalidInt(#[from] ParseIntError),
    #[error("`{0}` does not fit into a 64 bit byte count")]
    Overflow(String),
}

/// One histogram bucket, the half-open interval `[min, max)`.
///
/// Buckets are deduplicated on the byte counts, the label keeps the tokens as they were logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SizeRange {
    pub min: ByteSize,
    pub max: ByteSize,
    pub display_text: String,
}

impl SizeRange {
    pub fn from_tokens(min_token: &str, max_token: &str) -> Self {
        let (min_token, max_token) = (min_token.trim(), max_token.trim());
        SizeRange {
            min: ByteSize::from_token(min_token),
            max: ByteSize::from_token(max_token),
            display_text: format!("[{min_token}, {max_token})"),
        }
    }

    pub fn from_bytes(min: ByteSize, max: ByteSize) -> Self {
        SizeRange {
            min,
            max,
            display_text: format!("[{}, {})", min.to_token(), max.to_token()),
        }
    }

    pub fn contains(&self, bytes: ByteSize) -> bool {
        self.min <= bytes && bytes < self.max
    }
}
