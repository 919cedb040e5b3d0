/// Returns true for code points that render as (or combine into) emoji.
pub fn is_emoji(c: char) -> bool {
    matches!(
        c,
        '\u{1F000}'..='\u{1FAFF}'
            | '\u{2600}'..='\u{27BF}'
            | '\u{2B00}'..='\u{2BFF}'
            | '\u{2300}'..='\u{23FF}'
            | '\u{FE00}'..='\u{FE0F}'
            | '\u{200D}'
            | '\u{20E3}'
            | '\u{E0020}'..='\u{E007F}'
            // emoji scattered outside the pictograph blocks
            | '\u{00A9}'
            | '\u{00AE}'
            | '\u{203C}'
            | '\u{2049}'
            | '\u{2122}'
            | '\u{2139}'
            | '\u{2194}'..='\u{2199}'
            | '\u{21A9}'..='\u{21AA}'
            | '\u{24C2}'
            | '\u{25AA}'..='\u{25AB}'
            | '\u{25B6}'
            | '\u{25C0}'
            | '\u{25FB}'..='\u{25FE}'
            | '\u{2934}'..='\u{2935}'
            | '\u{3030}'
            | '\u{303D}'
            | '\u{3297}'
            | '\u{3299}'
    )
}

/// Removes emoji glyphs from flair text. Whitespace is left alone.
///
/// A character followed by VS16 (U+FE0F) or the keycap combiner (U+20E3) is
/// rendered as emoji, so it goes too: `1\u{FE0F}\u{20E3}` and `#\u{20E3}`
/// disappear entirely.
pub fn strip_emoji(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if is_emoji(c) || matches!(chars.peek(), Some('\u{FE0F}' | '\u{20E3}')) {
            continue;
        }
        out.push(c);
    }
    out
}
