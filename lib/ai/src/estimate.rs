//! Token-count estimation for size backpressure.
//!
//! The OpenAI side has no pre-flight token count, so its context size is
//! approximated locally. The heuristic is deliberately pessimistic for
//! CJK text, which tokenizes close to one token per character.

/// Estimates how many tokens a text occupies.
pub trait TokenEstimator: Send + Sync {
    /// Returns the estimated token count of `text`.
    fn estimate(&self, text: &str) -> u64;
}

/// Character-class heuristic: one token per CJK character, one token per
/// four characters of anything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3000..=0x303F    // CJK symbols and punctuation
            | 0x3040..=0x30FF  // hiragana, katakana
            | 0x3400..=0x4DBF  // CJK extension A
            | 0x4E00..=0x9FFF  // CJK unified ideographs
            | 0xAC00..=0xD7AF  // hangul syllables
            | 0xF900..=0xFAFF  // CJK compatibility ideographs
            | 0xFF00..=0xFFEF // halfwidth and fullwidth forms
    )
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> u64 {
        let (cjk, other) = text.chars().fold((0u64, 0u64), |(cjk, other), c| {
            if is_cjk(c) {
                (cjk + 1, other)
            } else {
                (cjk, other + 1)
            }
        });
        cjk + other.div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(HeuristicEstimator.estimate(""), 0);
    }

    #[test]
    fn latin_text_is_quartered() {
        assert_eq!(HeuristicEstimator.estimate("abcdefgh"), 2);
        assert_eq!(HeuristicEstimator.estimate("abcdefghi"), 3);
    }

    #[test]
    fn cjk_counts_per_character() {
        assert_eq!(HeuristicEstimator.estimate("自由意志"), 4);
        assert_eq!(HeuristicEstimator.estimate("自由意志 is"), 5);
    }
}
