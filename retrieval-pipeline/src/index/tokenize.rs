//! Lexical tokenization for the hand-rolled BM25 half of the hybrid index.
//!
//! English/mixed text is split on runs of ASCII alphanumerics (lowercased);
//! CJK text carries no whitespace between words, so each CJK codepoint is
//! its own token (a character-unigram model, the common BM25-for-Chinese
//! fallback in the absence of a real segmenter).

pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut buf = String::new();

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            buf.push(ch.to_ascii_lowercase());
            continue;
        }
        if !buf.is_empty() {
            tokens.push(std::mem::take(&mut buf));
        }
        if is_cjk(ch) {
            tokens.push(ch.to_string());
        }
    }
    if !buf.is_empty() {
        tokens.push(buf);
    }

    tokens
}

fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF
    )
}

#[cfg(test)]
mod tests {
    use super::tokenize;

    #[test]
    fn splits_ascii_words_and_lowercases() {
        assert_eq!(
            tokenize("Visa Application Deadlines"),
            vec!["visa", "application", "deadlines"]
        );
    }

    #[test]
    fn treats_each_cjk_character_as_a_token() {
        assert_eq!(
            tokenize("签证申请"),
            vec!["签", "证", "申", "请"]
        );
    }

    #[test]
    fn handles_mixed_script_text() {
        assert_eq!(
            tokenize("F-1 签证 deadline"),
            vec!["f", "1", "签", "证", "deadline"]
        );
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").is_empty());
    }
}
