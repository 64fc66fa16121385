/// Caches token bytes until they form complete UTF-8.
///
/// A single token piece can end in the middle of a multi-byte code point
/// (emoji, CJK). Bytes are held back until the code point is complete.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    buf: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append `bytes` and return the text that is complete so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        // NULs would truncate the string on the Java side.
        self.buf.extend(bytes.iter().copied().filter(|b| *b != 0));

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.buf) {
                Ok(s) => {
                    out.push_str(s);
                    self.buf.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.buf[..valid_up_to]));
                    match e.error_len() {
                        // Incomplete tail: wait for the next piece.
                        None => {
                            self.buf.drain(..valid_up_to);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.buf.drain(..valid_up_to + bad);
                        }
                    }
                }
            }
        }
    }

    /// Drain everything still cached, replacing broken sequences.
    pub fn flush_lossy(&mut self) -> String {
        if self.buf.is_empty() {
            return String::new();
        }
        let s = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        s
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(b"Hello"), "Hello");
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn test_split_code_point_is_held_back() {
        // "你" = E4 BD A0
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(&[b'a', 0xE4, 0xBD]), "a");
        assert_eq!(stream.pending(), 2);
        assert_eq!(stream.push(&[0xA0, b'!']), "你!");
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn test_emoji_across_four_pieces() {
        let bytes = "🙂".as_bytes();
        let mut stream = Utf8Stream::new();
        for b in &bytes[..3] {
            assert_eq!(stream.push(&[*b]), "");
        }
        assert_eq!(stream.push(&bytes[3..]), "🙂");
    }

    #[test]
    fn test_invalid_bytes_do_not_block() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(&[0xFF, b'o', b'k']), "\u{FFFD}ok");
        assert_eq!(stream.pending(), 0);
    }

    #[test]
    fn test_nul_bytes_are_dropped() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(b"a\0b"), "ab");
    }

    #[test]
    fn test_flush_lossy_drains_partial_sequence() {
        let mut stream = Utf8Stream::new();
        assert_eq!(stream.push(&[0xE4, 0xBD]), "");
        assert_eq!(stream.flush_lossy(), "\u{FFFD}");
        assert_eq!(stream.pending(), 0);
        assert_eq!(stream.flush_lossy(), "");
    }
}
