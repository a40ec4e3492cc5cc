use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// The chunker never produces a chunk for empty input; everything else it
/// does is infallible.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("document text is empty after normalization")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLanguage {
    En,
    Zh,
    Mixed,
}

impl ChunkLanguage {
    /// Guesses the dominant script of a document from its extracted text.
    /// Used to pick sentence-boundary punctuation for chunking and to set
    /// `Document::language` without requiring the caller to supply it.
    pub fn detect(text: &str) -> Self {
        let mut cjk = 0usize;
        let mut latin = 0usize;
        for c in text.chars() {
            if is_cjk(c) {
                cjk += 1;
            } else if c.is_ascii_alphabetic() {
                latin += 1;
            }
        }
        match (cjk, latin) {
            (0, 0) => ChunkLanguage::En,
            (0, _) => ChunkLanguage::En,
            (_, 0) => ChunkLanguage::Zh,
            (cjk, latin) => {
                let total = (cjk + latin) as f64;
                if cjk as f64 / total > 0.6 {
                    ChunkLanguage::Zh
                } else if latin as f64 / total > 0.6 {
                    ChunkLanguage::En
                } else {
                    ChunkLanguage::Mixed
                }
            }
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

fn is_boundary(c: char, language: ChunkLanguage) -> bool {
    match language {
        ChunkLanguage::Zh => matches!(c, '。' | '!' | '?' | '；' | '\n'),
        ChunkLanguage::En => matches!(c, '.' | '!' | '?' | '\n'),
        ChunkLanguage::Mixed => matches!(c, '。' | '！' | '？' | '；' | '.' | '!' | '?' | '\n'),
    }
}

/// A contiguous slice of a normalized document, with char offsets into that
/// normalized text (not the original, pre-NFC bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Splits normalized text into sentence-like units on language-appropriate
/// boundary punctuation, keeping the boundary character with the unit that
/// precedes it.
fn split_units(text: &str, language: ChunkLanguage) -> Vec<ChunkSpan> {
    let mut units = Vec::new();
    let mut unit_start = 0usize;
    let mut current = String::new();
    let mut char_idx = 0usize;

    for c in text.chars() {
        current.push(c);
        char_idx += 1;
        if is_boundary(c, language) {
            units.push(ChunkSpan {
                text: std::mem::take(&mut current),
                char_start: unit_start,
                char_end: char_idx,
            });
            unit_start = char_idx;
        }
    }
    if !current.is_empty() {
        units.push(ChunkSpan {
            text: current,
            char_start: unit_start,
            char_end: char_idx,
        });
    }
    units
}

/// A unit that by itself exceeds `max_chars` is split further so a single
/// sentence never forces a chunk past budget. Splits at the nearest
/// whitespace at or before the budget; CJK text with no whitespace is cut at
/// the char boundary instead.
fn split_oversized(unit: &ChunkSpan, max_chars: usize) -> Vec<ChunkSpan> {
    if unit.char_end - unit.char_start <= max_chars {
        return vec![unit.clone()];
    }

    let chars: Vec<char> = unit.text.chars().collect();
    let mut pieces = Vec::new();
    let mut offset = 0usize;

    while offset < chars.len() {
        let remaining = chars.len() - offset;
        let take = remaining.min(max_chars);
        let mut end = offset + take;

        if end < chars.len() {
            if let Some(ws) = (offset..end).rev().find(|&i| chars[i].is_whitespace()) {
                if ws > offset {
                    end = ws + 1;
                }
            }
        }

        let piece: String = chars[offset..end].iter().collect();
        pieces.push(ChunkSpan {
            char_start: unit.char_start + offset,
            char_end: unit.char_start + end,
            text: piece,
        });
        offset = end;
    }

    pieces
}

fn pack(units: &[&ChunkSpan]) -> ChunkSpan {
    let text = units.iter().map(|u| u.text.as_str()).collect::<String>();
    ChunkSpan {
        char_start: units.first().map_or(0, |u| u.char_start),
        char_end: units.last().map_or(0, |u| u.char_end),
        text,
    }
}

/// Carries the trailing units of the just-closed chunk into the next one
/// until at least `overlap` chars have been retained, preserving unit
/// boundaries (never splits a unit to hit the overlap exactly).
fn carry_overlap<'a>(units: &[&'a ChunkSpan], overlap: usize) -> Vec<&'a ChunkSpan> {
    if overlap == 0 {
        return Vec::new();
    }
    let mut carried = Vec::new();
    let mut len = 0usize;
    for unit in units.iter().rev() {
        carried.push(*unit);
        len += unit.char_end - unit.char_start;
        if len >= overlap {
            break;
        }
    }
    carried.reverse();
    carried
}

/// Greedily packs sentence-like units into chunks of at most `max_chars`
/// chars, carrying `overlap` chars of trailing context into the next chunk.
/// Never splits a unit across chunks unless the unit alone exceeds
/// `max_chars`, in which case it is pre-split on whitespace.
pub fn chunk_text(
    text: &str,
    max_chars: usize,
    overlap: usize,
    language: ChunkLanguage,
) -> Result<Vec<ChunkSpan>, ChunkError> {
    let normalized: String = text.nfc().collect();
    if normalized.trim().is_empty() {
        return Err(ChunkError::Empty);
    }

    let raw_units = split_units(&normalized, language);
    let units: Vec<ChunkSpan> = raw_units
        .iter()
        .flat_map(|u| split_oversized(u, max_chars))
        .collect();

    let mut chunks = Vec::new();
    let mut current: Vec<&ChunkSpan> = Vec::new();
    let mut current_len = 0usize;

    for unit in &units {
        let unit_len = unit.char_end - unit.char_start;
        if current_len > 0 && current_len + unit_len > max_chars {
            chunks.push(pack(&current));
            current = carry_overlap(&current, overlap);
            current_len = current.iter().map(|u| u.char_end - u.char_start).sum();
        }
        current.push(unit);
        current_len += unit_len;
    }
    if !current.is_empty() {
        chunks.push(pack(&current));
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_input() {
        let result = chunk_text("   \n\t", 800, 120, ChunkLanguage::En);
        assert!(matches!(result, Err(ChunkError::Empty)));
    }

    #[test]
    fn packs_short_text_into_a_single_chunk() {
        let text = "Studying abroad in Tokyo requires a visa. Bring your passport.";
        let chunks = chunk_text(text, 800, 120, ChunkLanguage::En).expect("chunk");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, text.chars().count());
    }

    #[test]
    fn splits_long_text_on_sentence_boundaries_with_overlap() {
        let sentence = "This sentence is exactly forty chars long. ";
        let text = sentence.repeat(30);
        let chunks = chunk_text(&text, 200, 40, ChunkLanguage::En).expect("chunk");
        assert!(chunks.len() > 1);
        for w in chunks.windows(2) {
            assert!(w[0].char_end > w[1].char_start || w[0].char_end == w[1].char_start);
        }
        for chunk in &chunks {
            assert!(!chunk.text.is_empty());
        }
    }

    #[test]
    fn never_splits_a_unit_under_budget() {
        let text = "一句话。".repeat(5);
        let chunks = chunk_text(&text, 1000, 0, ChunkLanguage::Zh).expect("chunk");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn splits_oversized_unit_without_whitespace() {
        let text = "一".repeat(50) + "。";
        let chunks = chunk_text(&text, 10, 0, ChunkLanguage::Zh).expect("chunk");
        assert!(chunks.len() >= 5);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 10);
        }
    }

    #[test]
    fn detects_language_by_script_majority() {
        assert_eq!(ChunkLanguage::detect("Hello world, this is English."), ChunkLanguage::En);
        assert_eq!(ChunkLanguage::detect("这是一段中文文本用于测试语言检测"), ChunkLanguage::Zh);
        assert_eq!(
            ChunkLanguage::detect("Hello 你好 this has both English words and 中文字符混合文本"),
            ChunkLanguage::Mixed
        );
    }
}
