//! Byte streams wiring pipeline stages together.
//!
//! Two shapes, per the pipeline contract:
//!
//! - **Buffer-backed** — retains everything written so the next stage (or a
//!   redirection) can consume it after the writer finishes.
//! - **Pass-through** — forwards straight to the terminal; used for the
//!   last stage of a pipeline when its output is not redirected, so `cat`
//!   and friends stream in real time.
//!
//! Per-line consumption is a thin splitter over the buffered bytes; there
//! is no buffered-reader machinery because stages run strictly in sequence
//! and buffers never outlive the enclosing pipeline's execute call.

use std::io::Write;

/// A stage's stdin: an owned byte buffer with a read cursor.
#[derive(Debug, Default)]
pub struct InputStream {
    data: Vec<u8>,
    pos: usize,
}

impl InputStream {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Remaining unread bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Read up to `n` bytes, advancing the cursor. Returns `None` at EOF.
    pub fn read_chunk(&mut self, n: usize) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }
        let end = (self.pos + n).min(self.data.len());
        let chunk = &self.data[self.pos..end];
        self.pos = end;
        Some(chunk)
    }

    /// Read everything left, advancing the cursor to EOF.
    pub fn read_to_end(&mut self) -> Vec<u8> {
        let rest = self.data[self.pos..].to_vec();
        self.pos = self.data.len();
        rest
    }

    /// Iterate remaining content line by line, terminators preserved.
    /// Does not advance the cursor.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.data[self.pos..].split_inclusive(|&b| b == b'\n')
    }
}

/// A stage's stdout or stderr.
#[derive(Debug)]
pub enum OutputStream {
    /// Retains written bytes for the next stage / redirection planner.
    Buffer(Vec<u8>),
    /// Writes immediately to the real stdout. Tracks whether the last byte
    /// written was a newline so the REPL can keep the prompt on its own
    /// line.
    Stdout { wrote_newline: bool, wrote_any: bool },
}

impl OutputStream {
    pub fn buffer() -> Self {
        OutputStream::Buffer(Vec::new())
    }

    pub fn passthrough() -> Self {
        OutputStream::Stdout {
            wrote_newline: false,
            wrote_any: false,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, OutputStream::Stdout { .. })
    }

    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match self {
            OutputStream::Buffer(buf) => buf.extend_from_slice(bytes),
            OutputStream::Stdout {
                wrote_newline,
                wrote_any,
            } => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(bytes);
                *wrote_newline = bytes.ends_with(b"\n");
                *wrote_any = true;
            }
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    pub fn flush(&mut self) {
        if let OutputStream::Stdout { .. } = self {
            let _ = std::io::stdout().flush();
        }
    }

    /// Drain buffered content. Pass-through streams yield nothing; their
    /// bytes are already on the terminal.
    pub fn take(&mut self) -> Vec<u8> {
        match self {
            OutputStream::Buffer(buf) => std::mem::take(buf),
            OutputStream::Stdout { .. } => Vec::new(),
        }
    }

    /// Whether output (if any) ended with a newline. Buffers report their
    /// current tail; pass-through reports the last write.
    pub fn ends_with_newline(&self) -> bool {
        match self {
            OutputStream::Buffer(buf) => buf.is_empty() || buf.ends_with(b"\n"),
            OutputStream::Stdout {
                wrote_newline,
                wrote_any,
            } => !*wrote_any || *wrote_newline,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
