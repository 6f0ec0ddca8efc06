//! Size-bounded text segmentation
//!
//! Splits formatted output into segments no longer than a transport limit,
//! breaking on line boundaries first and word boundaries second. Lengths are
//! measured in UTF-16 code units, which is how Telegram counts message text,
//! so an emoji outside the BMP counts twice.

use tracing::warn;

use crate::error::RelayError;

/// Message length as Telegram measures it
pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Split `text` into ordered segments of at most `max_len` units (see [`text_len`]).
///
/// Segments are trimmed and whitespace-only segments are dropped, so an empty
/// input yields no segments. A single word longer than `max_len` is emitted
/// as-is in its own over-limit segment.
pub fn split(text: &str, max_len: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if text_len(text) <= max_len {
        return vec![trimmed.to_string()];
    }

    let mut out = Segments::new(max_len);
    let mut pending = Buffer::default();

    for line in text.split('\n') {
        let line_len = text_len(line);

        if line_len > max_len {
            out.flush(&mut pending);

            let mut words = Buffer::default();
            for word in line.split(' ') {
                let word_len = text_len(word);
                if words.len + word_len + 1 > max_len {
                    out.flush(&mut words);
                }
                words.push(word, word_len);
                words.push(" ", 1);
            }

            // The tail of a long line opens the next pending segment.
            let tail = words.text.trim();
            if !tail.is_empty() {
                let tail_len = text_len(tail);
                pending.text = tail.to_string();
                pending.len = tail_len;
                pending.push("\n", 1);
            }
            continue;
        }

        if pending.len + line_len + 1 > max_len {
            out.flush(&mut pending);
        }
        pending.push(line, line_len);
        pending.push("\n", 1);
    }

    out.flush(&mut pending);
    out.segments
}

/// Accumulator that tracks its char length alongside the text
#[derive(Default)]
struct Buffer {
    text: String,
    len: usize,
}

impl Buffer {
    fn push(&mut self, s: &str, len: usize) {
        self.text.push_str(s);
        self.len += len;
    }

    fn take(&mut self) -> String {
        self.len = 0;
        std::mem::take(&mut self.text)
    }
}

struct Segments {
    segments: Vec<String>,
    max_len: usize,
}

impl Segments {
    fn new(max_len: usize) -> Self {
        Self {
            segments: Vec::new(),
            max_len,
        }
    }

    fn flush(&mut self, buf: &mut Buffer) {
        let text = buf.take();
        let segment = text.trim();
        if segment.is_empty() {
            return;
        }

        let len = text_len(segment);
        if len > self.max_len {
            let violation = RelayError::ChunkSizeViolation {
                len,
                limit: self.max_len,
            };
            warn!(error = %violation, "Emitting unbreakable segment over the size limit");
        }
        self.segments.push(segment.to_string());
    }
}
