//! Codepoint-offset arithmetic over UTF-8 strings.
//!
//! Every position the engine hands out is a codepoint count, but segment
//! payloads are stored as UTF-8 bytes. These helpers translate between the
//! two. ropey's str_utils does the heavy lifting; it handles the multi-byte
//! scanning far better than `char_indices().nth()` would.

pub fn chars_to_bytes(s: &str, char_pos: usize) -> usize {
    ropey::str_utils::char_to_byte_idx(s, char_pos)
}

pub fn bytes_to_chars(s: &str, byte_pos: usize) -> usize {
    ropey::str_utils::byte_to_char_idx(s, byte_pos)
}

pub fn count_chars(s: &str) -> usize {
    bytes_to_chars(s, s.len())
}

pub fn split_at_char(s: &str, char_pos: usize) -> (&str, &str) {
    s.split_at(chars_to_bytes(s, char_pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_positions() {
        assert_eq!(chars_to_bytes("hello", 0), 0);
        assert_eq!(chars_to_bytes("hello", 3), 3);
        assert_eq!(count_chars("hello"), 5);
        assert_eq!(split_at_char("hello", 2), ("he", "llo"));
    }

    #[test]
    fn multibyte_positions() {
        // Two, three and four byte encodings.
        let s = "a\u{00e9}\u{4e16}\u{1f600}b";
        assert_eq!(count_chars(s), 5);
        assert_eq!(chars_to_bytes(s, 1), 1);
        assert_eq!(chars_to_bytes(s, 2), 3);
        assert_eq!(chars_to_bytes(s, 3), 6);
        assert_eq!(chars_to_bytes(s, 4), 10);
        assert_eq!(bytes_to_chars(s, 6), 3);
        assert_eq!(split_at_char(s, 3).1, "\u{1f600}b");
    }

    #[test]
    fn round_trips() {
        let s = "na\u{00ef}ve \u{1f9f5} text";
        for i in 0..=count_chars(s) {
            assert_eq!(bytes_to_chars(s, chars_to_bytes(s, i)), i);
        }
    }
}
