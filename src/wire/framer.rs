//! Newline-delimited frame accumulator.
//!
//! Each wire message is a complete UTF-8 JSON object terminated by `\n`.
//! The framer only knows about bytes and line boundaries; it has no
//! knowledge of the codec above it.

/// Accumulates bytes from a stream and yields complete newline-terminated
/// frames, retaining any incomplete tail between calls.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed newly-received bytes into the accumulator.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered. The trailing `\n`
    /// is stripped; a trailing `\r` (CRLF framing) is stripped too.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
        frame.pop(); // '\n'
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
        Some(frame)
    }

    /// Number of bytes currently buffered without a terminating newline.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Encode a single message as a newline-terminated frame.
pub fn encode_frame(json: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(json.len() + 1);
    out.extend_from_slice(json.as_bytes());
    out.push(b'\n');
    out
}
