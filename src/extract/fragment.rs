//! Preview snippets for search result listings.

/// Collapse whitespace in `text` and cut it to at most `max_chars`
/// characters, ending on a word boundary where one exists.
pub fn fragment(text: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut count = 0usize;

    for word in text.split_whitespace() {
        let sep = usize::from(!out.is_empty());
        let len = word.chars().count();
        if count + sep + len <= max_chars {
            if sep == 1 {
                out.push(' ');
            }
            out.push_str(word);
            count += sep + len;
            continue;
        }
        // A single word longer than the limit is cut mid-word
        if out.is_empty() {
            out.extend(word.chars().take(max_chars));
        }
        break;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_collapsed() {
        assert_eq!(fragment("  hello\r\n\tworld  ", 150), "hello world");
    }

    #[test]
    fn test_cut_at_word_boundary() {
        assert_eq!(fragment("the quick brown fox", 12), "the quick");
        assert_eq!(fragment("the quick brown fox", 15), "the quick brown");
    }

    #[test]
    fn test_long_word_is_truncated() {
        assert_eq!(fragment("abcdefghij klm", 4), "abcd");
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        assert_eq!(fragment("héllo wörld", 11), "héllo wörld");
        assert_eq!(fragment("", 10), "");
    }
}
