//! Content hashing helpers.
//!
//! Hashes are SHA-256 hex digests from `ring`. They are stable across
//! process restarts and used purely for change detection.

use ring::digest::{Context, SHA256};

/// Unit separator placed between fields so `("ab", "c")` and `("a", "bc")`
/// never collide.
const FIELD_SEPARATOR: &[u8] = &[0x1f];

/// Incremental hasher over an ordered list of fields.
pub struct ContentHasher {
    ctx: Context,
    first: bool,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctx: Context::new(&SHA256),
            first: true,
        }
    }

    /// Append one field.
    #[must_use]
    pub fn field(mut self, value: &str) -> Self {
        if !self.first {
            self.ctx.update(FIELD_SEPARATOR);
        }
        self.first = false;
        self.ctx.update(value.as_bytes());
        self
    }

    /// Append an optional field; `None` hashes as the empty string.
    #[must_use]
    pub fn optional(self, value: Option<&str>) -> Self {
        self.field(value.unwrap_or_default())
    }

    /// Finish and return the lowercase hex digest.
    pub fn finish(self) -> String {
        to_hex(self.ctx.finish().as_ref())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of a single string, hex encoded.
pub fn sha256_hex(input: &str) -> String {
    to_hex(ring::digest::digest(&SHA256, input.as_bytes()).as_ref())
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
