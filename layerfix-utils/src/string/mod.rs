//! String helpers for log previews and source positions

use unicode_segmentation::UnicodeSegmentation;

/// Truncate text to at most `max_len` bytes on a grapheme boundary,
/// appending an ellipsis when something was cut.
pub fn safe_truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    let mut truncated = String::new();
    let mut current_len = 0;

    for grapheme in text.graphemes(true) {
        let grapheme_len = grapheme.len();
        if current_len + grapheme_len > max_len {
            break;
        }
        truncated.push_str(grapheme);
        current_len += grapheme_len;
    }

    if current_len + 3 <= max_len {
        truncated.push_str("...");
    } else if max_len >= 3 {
        // Drop whole graphemes until the ellipsis fits
        while truncated.len() + 3 > max_len {
            let last = truncated.graphemes(true).next_back().map_or(0, str::len);
            if last == 0 {
                break;
            }
            truncated.truncate(truncated.len() - last);
        }
        truncated.push_str("...");
    }

    truncated
}

/// 1-based line number of a byte offset
pub fn line_number_at(text: &str, byte_offset: usize) -> usize {
    let end = byte_offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}
