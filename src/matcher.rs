use crate::keywords::{extract_keywords, Tokenizer};
use crate::models::{CandidateStore, RecommendationDraft};

/// Normalizes a vendor name for comparison: keeps Hangul syllables, ASCII
/// letters and digits, lowercases. Idempotent, so cleaning a cleaned string
/// is a no-op.
pub fn clean(s: &str) -> String {
    s.chars()
        .filter(|c| is_hangul_syllable(*c) || c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn is_hangul_syllable(c: char) -> bool {
    ('가'..='힣').contains(&c)
}

/// Resolves a draft's free-text store name against the full candidate list,
/// scanned in its original order.
///
/// A substring relation between the normalized names, in either direction,
/// wins immediately. Otherwise the first candidate whose name tokens contain
/// one of the draft's keywords is remembered while the scan continues looking
/// for a substring hit. Empty normalized names never participate in the
/// substring test. `None` means the caller should fall back, not that
/// something failed.
pub fn match_draft<'a>(
    tokenizer: &dyn Tokenizer,
    draft: &RecommendationDraft,
    candidates: &'a [CandidateStore],
) -> Option<&'a CandidateStore> {
    let target = clean(&draft.store);
    let mut keyword_hit: Option<&CandidateStore> = None;

    for candidate in candidates {
        let cleaned = clean(&candidate.name);
        if !target.is_empty()
            && !cleaned.is_empty()
            && (cleaned.contains(&target) || target.contains(&cleaned))
        {
            return Some(candidate);
        }

        if keyword_hit.is_none() && !draft.keywords.is_empty() {
            let name_keywords = extract_keywords(tokenizer, &candidate.name);
            if draft
                .keywords
                .iter()
                .any(|keyword| name_keywords.iter().any(|k| k == keyword))
            {
                keyword_hit = Some(candidate);
            }
        }
    }

    keyword_hit
}
