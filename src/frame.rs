//! # Frame Decoder Module
//!
//! Reassembles the radio link's byte chunks into discrete wire records.
//! The sensor module streams continuously and chunk boundaries land
//! anywhere, including mid-record, so incoming text accumulates in a
//! receive buffer and only complete delimited records are extracted.
//!
//! ## Key Types
//! - `TextEncoding`: ordered decoding fallback for raw chunks
//! - `Framing`: the two wire variants behind one extraction interface
//! - `FrameDecoder`: owns the receive buffer; sole mutator of it
//!
//! ## Failure Policy
//! Undecodable chunks are logged and discarded; an incomplete trailing
//! record is retained for completion by a future chunk. Neither case is
//! an error to callers.

/// Candidate text encoding for decoding raw chunks.
///
/// Tried in the order configured for the session. Latin-1 maps every
/// byte to a character, so a list ending in it makes decoding total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Ascii,
}

impl TextEncoding {
    /// Look up an encoding by its config name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Some(TextEncoding::Latin1),
            "ascii" | "us-ascii" => Some(TextEncoding::Ascii),
            _ => None,
        }
    }

    fn decode(&self, chunk: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(chunk).ok().map(str::to_string),
            TextEncoding::Latin1 => Some(chunk.iter().map(|&b| b as char).collect()),
            TextEncoding::Ascii => {
                if chunk.is_ascii() {
                    // Safe: ASCII is a UTF-8 subset
                    std::str::from_utf8(chunk).ok().map(str::to_string)
                } else {
                    None
                }
            }
        }
    }
}

/// Wire framing variant, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `[ ... ]` spans, possibly several per chunk, possibly split across chunks
    Brackets,
    /// Newline-terminated lines (CSV variant)
    Lines,
}

/// Turns an unbounded chunk stream into complete wire records.
///
/// Owns the receive buffer exclusively. A record is only ever extracted
/// once both delimiters are present; everything before the last complete
/// record is consumed so the buffer cannot grow without bound.
pub struct FrameDecoder {
    buffer: String,
    encodings: Vec<TextEncoding>,
    framing: Framing,
}

impl FrameDecoder {
    pub fn new(framing: Framing, encodings: Vec<TextEncoding>) -> Self {
        Self {
            buffer: String::new(),
            encodings,
            framing,
        }
    }

    /// Decode a raw chunk, append it, and extract every complete record.
    ///
    /// Returns the extracted records in left-to-right arrival order.
    /// A chunk no configured encoding accepts is dropped whole; the
    /// buffer keeps whatever partial record it already held.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let Some(text) = self.decode_chunk(chunk) else {
            log::warn!(
                "Discarding undecodable {}-byte chunk (tried {} encodings)",
                chunk.len(),
                self.encodings.len()
            );
            return Vec::new();
        };

        self.buffer.push_str(&text);
        match self.framing {
            Framing::Brackets => self.extract_bracket_records(),
            Framing::Lines => self.extract_lines(),
        }
    }

    /// Drop any accumulated partial text.
    ///
    /// Called when the link reconnects: bytes buffered before a
    /// disconnect must never pair with bytes from the new connection.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            log::debug!("Dropping {} buffered bytes on decoder reset", self.buffer.len());
        }
        self.buffer.clear();
    }

    /// Bytes currently waiting for a completing delimiter.
    #[allow(dead_code)]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn decode_chunk(&self, chunk: &[u8]) -> Option<String> {
        for encoding in &self.encodings {
            if let Some(text) = encoding.decode(chunk) {
                return Some(text);
            }
        }
        None
    }

    fn extract_bracket_records(&mut self) -> Vec<String> {
        let mut records = Vec::new();
        let mut pos = 0;
        loop {
            let start = match self.buffer[pos..].find('[') {
                Some(i) => pos + i,
                None => {
                    // No record can begin in the remaining text
                    self.buffer.clear();
                    return records;
                }
            };
            let end = match self.buffer[start..].find(']') {
                Some(i) => start + i,
                None => {
                    // Partial record: keep from its opening delimiter
                    self.buffer.replace_range(..start, "");
                    return records;
                }
            };
            records.push(self.buffer[start..=end].to_string());
            pos = end + 1;
        }
    }

    fn extract_lines(&mut self) -> Vec<String> {
        let mut records = Vec::new();
        while let Some(nl) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=nl).collect();
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r').trim();
            if !line.is_empty() {
                records.push(line.to_string());
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bracket_decoder() -> FrameDecoder {
        FrameDecoder::new(
            Framing::Brackets,
            vec![TextEncoding::Utf8, TextEncoding::Latin1],
        )
    }

    #[test]
    fn test_single_complete_record() {
        let mut decoder = bracket_decoder();
        let records = decoder.push_chunk(b"[{\"PulseSensor\":{\"pulse_BPM\":72}}]");
        assert_eq!(records, vec!["[{\"PulseSensor\":{\"pulse_BPM\":72}}]"]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut decoder = bracket_decoder();
        assert!(decoder.push_chunk(b"[{\"Pulse").is_empty());
        let records = decoder.push_chunk(b"Sensor\":{\"pulse_BPM\":500}}]");
        assert_eq!(records, vec!["[{\"PulseSensor\":{\"pulse_BPM\":500}}]"]);
    }

    #[test]
    fn test_multiple_records_one_chunk() {
        let mut decoder = bracket_decoder();
        let records = decoder.push_chunk(b"[{\"a\":1}][{\"b\":2}][{\"c\":");
        assert_eq!(records, vec!["[{\"a\":1}]", "[{\"b\":2}]"]);
        // Trailing partial record stays buffered
        assert_eq!(decoder.pending_len(), "[{\"c\":".len());
    }

    #[test]
    fn test_garbage_between_records_dropped() {
        let mut decoder = bracket_decoder();
        let records = decoder.push_chunk(b"noise[{\"a\":1}]trailing");
        assert_eq!(records, vec!["[{\"a\":1}]"]);
        // Trailing text with no opening delimiter can never complete
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let payload = b"junk[{\"PulseSensor\":{\"pulse_BPM\":72}}]mid[{\"Gyro\":{\"r_rate\":30}}][partial";

        let mut whole = bracket_decoder();
        let expected = whole.push_chunk(payload);

        // Splitting the same bytes at every boundary must extract the
        // same record sequence.
        for split in 0..payload.len() {
            let mut decoder = bracket_decoder();
            let mut records = decoder.push_chunk(&payload[..split]);
            records.extend(decoder.push_chunk(&payload[split..]));
            assert_eq!(records, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_undecodable_chunk_discarded_buffer_intact() {
        // ASCII-only fallback list so invalid bytes are actually undecodable
        let mut decoder = FrameDecoder::new(
            Framing::Brackets,
            vec![TextEncoding::Utf8, TextEncoding::Ascii],
        );
        assert!(decoder.push_chunk(b"[{\"a\":").is_empty());
        let before = decoder.pending_len();

        // Invalid in UTF-8 and non-ASCII
        assert!(decoder.push_chunk(&[0xFF, 0xFE, 0x80]).is_empty());
        assert_eq!(decoder.pending_len(), before);

        // The next valid chunk completes the buffered record normally
        let records = decoder.push_chunk(b"1}]");
        assert_eq!(records, vec!["[{\"a\":1}]"]);
    }

    #[test]
    fn test_latin1_fallback_is_total() {
        let mut decoder = bracket_decoder();
        // 0xB5 is invalid UTF-8 on its own but decodes as Latin-1 micro sign
        let records = decoder.push_chunk(&[b'[', 0xB5, b']']);
        assert_eq!(records.len(), 1);
        assert!(records[0].starts_with('['));
    }

    #[test]
    fn test_line_framing() {
        let mut decoder = FrameDecoder::new(Framing::Lines, vec![TextEncoding::Utf8]);
        let records = decoder.push_chunk(b"72,18,36.6\r\n80,19,");
        assert_eq!(records, vec!["72,18,36.6"]);
        let records = decoder.push_chunk(b"36.9\n\n");
        assert_eq!(records, vec!["80,19,36.9"]);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut decoder = bracket_decoder();
        decoder.push_chunk(b"[{\"a\":");
        decoder.reset();
        assert_eq!(decoder.pending_len(), 0);
        // Post-reset data decodes independently of the dropped prefix
        let records = decoder.push_chunk(b"[{\"b\":2}]");
        assert_eq!(records, vec!["[{\"b\":2}]"]);
    }

    #[test]
    fn test_encoding_from_name() {
        assert_eq!(TextEncoding::from_name("UTF-8"), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::from_name("latin-1"), Some(TextEncoding::Latin1));
        assert_eq!(TextEncoding::from_name("ascii"), Some(TextEncoding::Ascii));
        assert_eq!(TextEncoding::from_name("utf-32"), None);
    }
}
