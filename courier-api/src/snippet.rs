use unicode_segmentation::UnicodeSegmentation;

/// Short preview of a message body: whitespace collapsed, truncated without
/// splitting grapheme clusters.
pub fn make_snippet(body: &str, max_graphemes: usize) -> String {
    if max_graphemes == 0 {
        return String::new();
    }
    let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.graphemes(true).take(max_graphemes).collect()
}
