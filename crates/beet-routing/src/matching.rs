/// Returns the byte length of `text` covered by `phrase` when `phrase` is a
/// case-insensitive prefix of `text`.
pub fn match_phrase_prefix(text: &str, phrase: &str) -> Option<usize> {
    let mut text_chars = text.char_indices();
    for expected in phrase.chars() {
        let (_, actual) = text_chars.next()?;
        if !chars_equal_ignore_case(expected, actual) {
            return None;
        }
    }
    Some(text_chars.next().map_or(text.len(), |(index, _)| index))
}

/// Drops the separators (punctuation, whitespace) in front of the next word.
pub fn strip_separators(text: &str) -> &str {
    text.trim_start_matches(|ch: char| !ch.is_alphanumeric())
}

pub(crate) fn continues_word(rest: &str) -> bool {
    rest.chars().next().is_some_and(char::is_alphanumeric)
}

fn chars_equal_ignore_case(left: char, right: char) -> bool {
    left == right || left.to_lowercase().eq(right.to_lowercase())
}
