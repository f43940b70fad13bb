//! Incremental UTF-8 decoding of helper output.
//!
//! Reads from the helper's stdout land on arbitrary byte boundaries, so a
//! multi-byte character can be split across two chunks. The decoder keeps the
//! unfinished tail of one chunk and completes it with the next.

/// Replacement for each maximal invalid subsequence.
const REPLACEMENT: char = '\u{FFFD}';

/// Stateful UTF-8 decoder. One instance must live for the whole stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while an incomplete sequence is waiting for more bytes.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Decode one chunk, carrying any trailing partial sequence forward.
    ///
    /// Invalid sequences are replaced with U+FFFD; this never fails.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(REPLACEMENT);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush at end of stream. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_whole(bytes: &[u8]) -> String {
        let mut d = Utf8Decoder::new();
        let mut s = d.decode(bytes);
        s.push_str(&d.finish());
        s
    }

    fn decode_chunked(bytes: &[u8], cuts: &[usize]) -> String {
        let mut d = Utf8Decoder::new();
        let mut s = String::new();
        let mut start = 0;
        for &cut in cuts {
            s.push_str(&d.decode(&bytes[start..cut]));
            start = cut;
        }
        s.push_str(&d.decode(&bytes[start..]));
        s.push_str(&d.finish());
        s
    }

    #[test]
    fn test_ascii_passthrough() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(b"ls\r\n"), "ls\r\n");
        assert!(!d.has_pending());
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "€".as_bytes();
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&bytes[..1]), "");
        assert!(d.has_pending());
        assert_eq!(d.decode(&bytes[1..2]), "");
        assert_eq!(d.decode(&bytes[2..]), "€");
        assert!(!d.has_pending());
    }

    #[test]
    fn test_every_two_way_split_matches_whole() {
        let bytes = "héllo 世界 🦀 \x1b[1;31mred\x1b[0m".as_bytes();
        let whole = decode_whole(bytes);
        for cut in 0..=bytes.len() {
            assert_eq!(decode_chunked(bytes, &[cut]), whole, "split at {cut}");
        }
    }

    #[test]
    fn test_every_three_way_split_matches_whole_with_invalid_bytes() {
        let mut bytes = "a🦀b".as_bytes().to_vec();
        bytes.extend_from_slice(&[0xF0, 0x9F, b'x', 0xFF, 0xC3]);
        bytes.extend_from_slice("é世".as_bytes());
        let whole = decode_whole(&bytes);
        for a in 0..=bytes.len() {
            for b in a..=bytes.len() {
                assert_eq!(decode_chunked(&bytes, &[a, b]), whole, "splits at {a},{b}");
            }
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = "日本語テキスト ✓";
        let cuts: Vec<usize> = (1..text.len()).collect();
        assert_eq!(decode_chunked(text.as_bytes(), &cuts), text);
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_dangling_sequence() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(d.finish(), "\u{FFFD}");
        assert!(!d.has_pending());
        assert_eq!(d.finish(), "");
    }
}
