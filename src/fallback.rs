use rand::seq::SliceRandom;
use rand::Rng;

use crate::keywords::{extract_keywords, Tokenizer};
use crate::models::{CandidateStore, MatchedRecommendation, RecommendationDraft};

/// Synthesizes recommendations straight from the candidate list, without the
/// model. Used whenever the model path dies (invocation failure, unparseable
/// output, nothing matched) so a non-empty candidate list always produces
/// results. Picks up to three distinct stores at random.
pub fn fallback_recommendations(
    tokenizer: &dyn Tokenizer,
    text: Option<&str>,
    candidates: &[CandidateStore],
    rng: &mut impl Rng,
) -> Vec<MatchedRecommendation> {
    let description = format!(
        "'{}'와 어울리는 인기 메뉴를 추천해요!",
        text.filter(|t| !t.is_empty()).unwrap_or("무작위")
    );
    candidates
        .choose_multiple(rng, 3)
        .map(|store| MatchedRecommendation {
            draft: RecommendationDraft {
                store: store.name.clone(),
                description: description.clone(),
                category: store.categories.first().cloned().unwrap_or_default(),
                keywords: extract_keywords(tokenizer, &store.name),
            },
            store: Some(store.clone()),
            via_fallback: true,
        })
        .collect()
}
