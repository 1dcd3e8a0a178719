//! Byte stream → text lines
//!
//! Reads arrive in arbitrary chunks. A UTF-8 sequence cut by a read
//! boundary is carried into the next chunk, as is a line without its
//! terminating `\n`. A chunk holding invalid UTF-8 is rendered as hex and
//! yields no lines. A line growing past `MAX_LINE_LEN` is dropped and the
//! rest of it, up to the next `\n`, is skipped.

use crate::constants::MAX_LINE_LEN;

/// Result of feeding one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Complete, non-blank lines (without `\n` / `\r\n`)
    Lines(Vec<String>),
    /// Invalid UTF-8, as a hex string
    Undecodable(String),
}

/// Longest incomplete UTF-8 sequence that can be waiting for more bytes
const MAX_UTF8_CARRY: usize = 3;

#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Bytes of an incomplete UTF-8 sequence
    pending_bytes: Vec<u8>,
    /// Text of the current, unterminated line
    pending_line: String,
    /// Inside an oversized line, waiting for its `\n`
    skipping: bool,
    /// Oversized lines dropped since the last `take_overlong`
    overlong: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk as read from the socket
    pub fn feed(&mut self, chunk: &[u8]) -> Decoded {
        let mut bytes = std::mem::take(&mut self.pending_bytes);
        bytes.extend_from_slice(chunk);

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            Err(e) if e.error_len().is_none() && bytes.len() - e.valid_up_to() <= MAX_UTF8_CARRY => {
                // Sequence cut at the end of the read
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                self.pending_bytes = rest.to_vec();
                std::str::from_utf8(valid).unwrap_or_default()
            }
            Err(_) => {
                // The line being assembled is unrecoverable as well
                self.pending_line.clear();
                return Decoded::Undecodable(hex::encode(&bytes));
            }
        };

        Decoded::Lines(self.split_lines(text))
    }

    /// End of stream: the unterminated last line, if any
    pub fn finish(&mut self) -> Decoded {
        if !self.pending_bytes.is_empty() {
            let bytes = std::mem::take(&mut self.pending_bytes);
            self.pending_line.clear();
            return Decoded::Undecodable(hex::encode(bytes));
        }

        self.skipping = false;
        let last = std::mem::take(&mut self.pending_line);
        Decoded::Lines(clean_line(&last).into_iter().collect())
    }

    /// Number of oversized lines dropped since the last call
    pub fn take_overlong(&mut self) -> usize {
        std::mem::take(&mut self.overlong)
    }

    /// Append freshly decoded text; only `text` is searched for `\n`
    fn split_lines(&mut self, text: &str) -> Vec<String> {
        let mut complete = Vec::new();
        let mut rest = text;

        while let Some(end) = rest.find('\n') {
            let segment = &rest[..end];
            rest = &rest[end + 1..];

            if std::mem::take(&mut self.skipping) {
                continue;
            }
            if self.pending_line.len() + segment.len() > MAX_LINE_LEN {
                self.pending_line.clear();
                self.overlong += 1;
                continue;
            }

            self.pending_line.push_str(segment);
            let line = std::mem::take(&mut self.pending_line);
            complete.extend(clean_line(&line));
        }

        if !self.skipping {
            if self.pending_line.len() + rest.len() > MAX_LINE_LEN {
                self.pending_line = String::new();
                self.skipping = true;
                self.overlong += 1;
            } else {
                self.pending_line.push_str(rest);
            }
        }

        complete
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.pending_bytes.len() + self.pending_line.len()
    }
}

fn clean_line(line: &str) -> Option<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
