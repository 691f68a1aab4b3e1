use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{CandidateStore, IntentCategory, UserIntent};

/// Builds the recommendation prompt: a per-category framing, the shuffled and
/// capped candidate list, and the strict output contract. The shuffle happens
/// before capping so no fixed prefix of the vendor feed dominates the prompt;
/// determinism in tests comes from the caller's seeded random source. The
/// trailing `#dummy=` line carries the cache-busting nonce so identical
/// prompts can still be forced to differ.
pub fn build_recommendation_prompt(
    intent: &UserIntent,
    candidates: &[CandidateStore],
    max_candidates: usize,
    dummy: &str,
    rng: &mut impl Rng,
) -> String {
    let mut lines: Vec<String> = candidates.iter().map(candidate_line).collect();
    if lines.len() > 1 {
        lines.shuffle(rng);
    }
    lines.truncate(max_candidates);

    let text = intent.raw_text.as_deref().unwrap_or_default();
    let (context, relevance) = match (text.is_empty(), intent.category) {
        (true, _) => (
            "사용자가 특별히 원하는 음식이 없습니다.".to_string(),
            "기분 태그와 인기 메뉴를 기준으로 추천해주세요.".to_string(),
        ),
        (false, IntentCategory::Mood) => (
            format!("사용자의 현재 기분은 \"{text}\"입니다."),
            format!("\"{text}\"일 때 먹으면 위로가 되거나 잘 어울리는 음식을 추천해주세요."),
        ),
        (false, IntentCategory::Situation) => (
            format!("사용자의 상황은 \"{text}\"입니다."),
            format!(
                "\"{text}\"에 어울리는 음식 또는 분위기의 가게를 골라주세요. \
                 (예: 야식이라면 배달이 빠른 곳)"
            ),
        ),
        (false, IntentCategory::Food) => (
            format!("사용자가 먹고 싶은 음식은 \"{text}\"입니다."),
            format!("\"{text}\"와 가장 비슷하거나 관련 있는 음식을 추천해주세요."),
        ),
        (false, IntentCategory::Other) => (
            format!("사용자의 요청은 \"{text}\"입니다."),
            format!("\"{text}\"와 의미적으로 가장 잘 맞는 가게를 골라주세요."),
        ),
    };

    let score_line = match &intent.mood_score {
        Some(score) if !score.is_empty() => {
            let tags: Vec<&str> = score.keys().map(|k| k.as_str()).collect();
            format!("\n기분 태그는 {}입니다.", tags.join(", "))
        }
        _ => String::new(),
    };

    let keyword = if text.is_empty() { "무작위" } else { text };

    format!(
        "{context}{score_line}\n\
         사용자 입력 키워드: \"{keyword}\"\n\n\
         아래는 현재 배달 가능한 음식점 리스트입니다. \
         각 줄은 \"가게명 | 카테고리 | 대표메뉴 | 키워드 | 태그\" 형식입니다.\n\
         ---\n\
         {}\n\
         ---\n\n\
         조건:\n\
         - {relevance}\n\
         - 각 추천마다 이유를 감성적으로 한 줄로 써주세요.\n\
         - 결과는 반드시 JSON 배열로, 아래 형식의 객체를 1~3개 주세요:\n\
         \x20   [{{\"store\": 음식점 이름, \"description\": 감성적 설명, \
         \"category\": 대표 카테고리, \"keywords\": [관련 키워드1, 관련 키워드2]}}]\n\n\
         주의:\n\
         - 위 리스트에 없거나 사용자 입력과 연관 없는 가게는 절대 추천하지 마세요.\n\
         - JSON 배열 외의 다른 글자는 출력하지 마세요.\n\
         #dummy={dummy}",
        lines.join("\n")
    )
}

fn candidate_line(store: &CandidateStore) -> String {
    format!(
        "{} | {} | {} | {} | {}",
        store.name,
        store.categories.join(", "),
        store.representative_menu,
        store.keywords.join(", "),
        store.tags.join(", ")
    )
}
