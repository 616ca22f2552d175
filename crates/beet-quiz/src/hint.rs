pub const HINT_PLACEHOLDER: char = '٭';

/// Shows the first `revealed` characters of `answer`, keeps whitespace and
/// masks everything else; characters are separated by single spaces.
pub fn make_hint(answer: &str, revealed: usize) -> String {
    answer
        .chars()
        .enumerate()
        .map(|(index, ch)| {
            if index < revealed || ch.is_whitespace() {
                ch
            } else {
                HINT_PLACEHOLDER
            }
        })
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Another letter may be revealed while the hint budget lasts and more of the
/// answer is hidden than shown.
pub fn can_reveal_more(answer: &str, revealed: usize, max_hints: usize) -> bool {
    let length = answer.chars().count();
    revealed < max_hints && length.saturating_sub(revealed) > revealed
}
