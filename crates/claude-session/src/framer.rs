use thiserror::Error;

/// Default cap for a single unterminated line: 1 MiB.
pub const DEFAULT_MAX_LINE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FramerError {
    #[error("line exceeds maximum length of {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("line is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("partial line left in buffer at end of stream")]
    PartialLineAtEof,
}

/// Accumulates bytes from an arbitrary stream and emits complete
/// `\n`-terminated UTF-8 lines.
///
/// A `\r` immediately before the `\n` is stripped. Bytes are buffered until a
/// newline arrives, so a multi-byte UTF-8 sequence split across two reads is
/// reassembled rather than rejected. A single unterminated run longer than
/// `max_line_size` fails with [`FramerError::LineTooLong`]; the stdio adapter
/// treats that as fatal for the current subprocess.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line_size: usize,
    strict_eof: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer {
            buf: Vec::new(),
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            strict_eof: false,
        }
    }

    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size;
        self
    }

    /// When set, a partial (non-JSON) leftover at EOF is an error instead of
    /// being discarded.
    pub fn with_strict_eof(mut self, strict_eof: bool) -> Self {
        self.strict_eof = strict_eof;
        self
    }

    /// Number of buffered bytes not yet emitted as a line.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append `bytes` and return every complete line they unlock.
    ///
    /// When the feed produced no complete line and the unterminated tail
    /// already exceeds the cap, fails with `LineTooLong`. If complete lines
    /// and an oversized tail arrive in the same feed, the lines are returned
    /// and the next feed fails.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, FramerError> {
        self.buf.extend_from_slice(bytes);
        let lines = self.drain_complete_lines()?;
        if lines.is_empty() && self.buf.len() > self.max_line_size {
            return Err(FramerError::LineTooLong {
                limit: self.max_line_size,
            });
        }
        Ok(lines)
    }

    /// Signal end-of-stream.
    ///
    /// A non-empty leftover that parses as a JSON value is emitted as a final
    /// line (the CLI does not always terminate its last frame). Any other
    /// leftover is discarded, or rejected when `strict_eof` is set.
    pub fn finish(&mut self) -> Result<Option<String>, FramerError> {
        let tail = std::mem::take(&mut self.buf);
        if tail.is_empty() {
            return Ok(None);
        }
        let line = match String::from_utf8(tail) {
            Ok(s) => s,
            Err(_) if self.strict_eof => return Err(FramerError::PartialLineAtEof),
            Err(_) => return Ok(None),
        };
        let trimmed = line.trim_end_matches('\r');
        if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
            return Ok(Some(trimmed.to_owned()));
        }
        if self.strict_eof {
            return Err(FramerError::PartialLineAtEof);
        }
        Ok(None)
    }

    fn drain_complete_lines(&mut self) -> Result<Vec<String>, FramerError> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = self.buf[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + pos;
            let mut line_bytes = &self.buf[consumed..end];
            if line_bytes.last() == Some(&b'\r') {
                line_bytes = &line_bytes[..line_bytes.len() - 1];
            }
            if line_bytes.len() > self.max_line_size {
                let limit = self.max_line_size;
                self.buf.drain(..=end);
                return Err(FramerError::LineTooLong { limit });
            }
            match std::str::from_utf8(line_bytes) {
                Ok(s) => lines.push(s.to_owned()),
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    self.buf.drain(..=end);
                    return Err(FramerError::InvalidUtf8 { valid_up_to });
                }
            }
            consumed = end + 1;
        }
        self.buf.drain(..consumed);
        Ok(lines)
    }
}
