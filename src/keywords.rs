use std::collections::HashSet;

use regex::Regex;

/// Language-specific noun segmentation. The default implementation is a
/// character-class splitter; a morphological analyzer or a remote tokenizer
/// service can be swapped in behind this trait without touching callers.
pub trait Tokenizer: Send + Sync {
    fn nouns(&self, text: &str) -> Vec<String>;
}

/// Treats maximal runs of Hangul or Latin letters, two characters or longer,
/// as noun-like tokens. Digits and punctuation act as separators.
pub struct RegexTokenizer {
    pattern: Regex,
}

impl RegexTokenizer {
    pub fn new() -> Self {
        let pattern =
            Regex::new("[가-힣a-zA-Z]{2,}").unwrap_or_else(|_| Regex::new("^$").unwrap());
        Self { pattern }
    }
}

impl Default for RegexTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for RegexTokenizer {
    fn nouns(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Ordered, de-duplicated keyword list for a vendor name. Empty or garbage
/// input yields an empty list; there is no failure path.
pub fn extract_keywords(tokenizer: &dyn Tokenizer, name: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in tokenizer.nouns(name) {
        if seen.insert(token.clone()) {
            keywords.push(token);
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_non_letter_characters() {
        let tokenizer = RegexTokenizer::new();
        let keywords = extract_keywords(&tokenizer, "교촌치킨-강남점 (24시)");
        assert_eq!(keywords, vec!["교촌치킨", "강남점"]);
    }

    #[test]
    fn drops_single_character_tokens() {
        let tokenizer = RegexTokenizer::new();
        let keywords = extract_keywords(&tokenizer, "원조 왕 돈까스");
        assert_eq!(keywords, vec!["원조", "돈까스"]);
    }

    #[test]
    fn deduplicates_preserving_order() {
        let tokenizer = RegexTokenizer::new();
        let keywords = extract_keywords(&tokenizer, "치킨 마니아 치킨");
        assert_eq!(keywords, vec!["치킨", "마니아"]);
    }

    #[test]
    fn garbage_input_yields_empty_list() {
        let tokenizer = RegexTokenizer::new();
        assert!(extract_keywords(&tokenizer, "").is_empty());
        assert!(extract_keywords(&tokenizer, "!!! 123 **").is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let tokenizer = RegexTokenizer::new();
        let first = extract_keywords(&tokenizer, "맘스터치 시흥점");
        let second = extract_keywords(&tokenizer, "맘스터치 시흥점");
        assert_eq!(first, second);
    }
}
