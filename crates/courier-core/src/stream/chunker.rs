//! Splits a completed response into word-sized chunks for incremental delivery.

/// Split `text` into chunks of one word each, every chunk keeping the
/// whitespace that follows it. Leading whitespace stays with the first word.
///
/// Concatenating the chunks always reproduces `text` exactly.
pub fn word_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut seen_word = false;
    let mut trailing_space = false;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            trailing_space |= seen_word;
        } else {
            if trailing_space {
                chunks.push(text[start..i].to_string());
                start = i;
                trailing_space = false;
            }
            seen_word = true;
        }
    }
    if start < text.len() {
        chunks.push(text[start..].to_string());
    }
    chunks
}
