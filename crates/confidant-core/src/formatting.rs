//! Text helpers for Telegram output.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Split plain text into chunks of at most `limit` bytes, preferring newline
/// boundaries and never cutting a UTF-8 character.
pub fn split_plain_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        let mut cut = floor_char_boundary(rest, limit);
        if cut == 0 {
            // First char alone exceeds `limit`; emit it whole.
            cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        } else if let Some(nl) = rest[..cut].rfind('\n') {
            if nl > 0 {
                cut = nl + 1;
            }
        }
        out.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_plain_chunks("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn prefers_newlines() {
        let chunks = split_plain_chunks("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn never_splits_multibyte_chars() {
        let text = "привет".repeat(10);
        let chunks = split_plain_chunks(&text, 7);
        assert!(chunks.iter().all(|c| c.len() <= 7));
        assert_eq!(chunks.concat(), text);
    }
}
