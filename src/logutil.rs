//! Log formatting for player-supplied text.
//!
//! Commands, chat and raw frames end up in debug logs. [`escaped`] wraps
//! such text so it renders on one line and stays short, without building
//! an intermediate `String` when the log level is filtered out.

use std::fmt::{self, Write};

/// Characters of player text kept in a log line.
pub const TEXT_PREVIEW: usize = 160;

pub struct Escaped<'a> {
    text: &'a str,
    limit: usize,
}

pub fn escaped(text: &str) -> Escaped<'_> {
    Escaped {
        text,
        limit: TEXT_PREVIEW,
    }
}

impl Escaped<'_> {
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = self.text.chars();
        for ch in chars.by_ref().take(self.limit) {
            match ch {
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\r' => f.write_str("\\r")?,
                '\t' => f.write_str("\\t")?,
                c if c.is_control() => write!(f, "\\u{{{:x}}}", c as u32)?,
                c => f.write_char(c)?,
            }
        }
        if chars.next().is_some() {
            write!(f, "...[{} bytes]", self.text.len())?;
        }
        Ok(())
    }
}
