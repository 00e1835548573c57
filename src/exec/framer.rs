//! Newline framing and lenient decoding of the child's stdout.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::error::StreamError;
use super::events::Event;

/// Splits a chunked byte stream into newline-terminated lines.
///
/// An incomplete trailing fragment is held back until the next chunk (or
/// [`finish`](Self::finish)) completes it. Works on bytes so multi-byte
/// characters split across reads are reassembled intact.
#[derive(Debug, Default)]
pub struct LineFramer {
    fragment: Vec<u8>,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in order.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<String> {
        self.fragment.extend_from_slice(chunk.as_ref());

        let Some(last_newline) = self.fragment.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.fragment.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.fragment, rest);

        complete[..last_newline]
            .split(|b| *b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Take the unterminated trailing fragment, if any, at stream close.
    pub fn finish(&mut self) -> Option<String> {
        if self.fragment.is_empty() {
            return None;
        }
        let fragment = std::mem::take(&mut self.fragment);
        Some(decode_line(&fragment))
    }

    /// Number of bytes currently held back.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.fragment.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse a single line of event output.
///
/// # Errors
///
/// Returns `StreamError::ParseError` if the line is not a valid record.
pub fn parse_line<T: DeserializeOwned>(line: &str) -> Result<T, StreamError> {
    serde_json::from_str(line).map_err(|e| StreamError::ParseError {
        input: line.to_string(),
        reason: e.to_string(),
    })
}

/// Line framer plus lenient per-line parsing.
///
/// Malformed lines are logged and dropped; they never interrupt framing of
/// the lines that follow.
#[derive(Debug)]
pub struct EventDecoder<T = Event> {
    framer: LineFramer,
    dropped: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Default for EventDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> EventDecoder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            framer: LineFramer::new(),
            dropped: 0,
            _marker: PhantomData,
        }
    }

    /// Decode every record completed by `chunk`.
    pub fn decode(&mut self, chunk: impl AsRef<[u8]>) -> Vec<T> {
        let lines = self.framer.feed(chunk);
        lines
            .iter()
            .filter_map(|line| self.accept(line))
            .collect()
    }

    /// Make the final parse attempt on an unterminated trailing line.
    pub fn flush(&mut self) -> Option<T> {
        let line = self.framer.finish()?;
        self.accept(&line)
    }

    /// Number of non-blank lines dropped as unparseable so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn accept(&mut self, line: &str) -> Option<T> {
        if line.trim().is_empty() {
            return None;
        }
        match parse_line(line) {
            Ok(record) => Some(record),
            Err(StreamError::ParseError { input, reason }) => {
                self.dropped += 1;
                tracing::warn!(line = %input, error = %reason, "Skipping malformed event line");
                None
            }
        }
    }
}
