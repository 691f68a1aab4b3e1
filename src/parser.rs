use regex::Regex;
use serde_json::Value;

use crate::error::StageError;
use crate::keywords::{extract_keywords, Tokenizer};
use crate::models::RecommendationDraft;

/// Parses raw model output into at most three recommendation drafts.
///
/// The text must be JSON once a surrounding code fence is removed; a single
/// object is wrapped into a one-element array. Elements without a usable
/// `store` name are dropped, missing keyword lists are re-derived from the
/// store name, and other missing fields default to empty.
pub fn parse_drafts(
    tokenizer: &dyn Tokenizer,
    raw: &str,
) -> Result<Vec<RecommendationDraft>, StageError> {
    let cleaned = strip_code_fence(raw);
    let value: Value = serde_json::from_str(cleaned.trim())
        .map_err(|err| StageError::LlmOutputMalformed(err.to_string()))?;

    let elements = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(StageError::LlmOutputMalformed(format!(
                "expected a JSON object or array, got {other}"
            )))
        }
    };

    let mut drafts = Vec::new();
    for element in elements {
        let Ok(mut draft) = serde_json::from_value::<RecommendationDraft>(element) else {
            continue;
        };
        if draft.store.trim().is_empty() {
            continue;
        }
        if draft.keywords.is_empty() {
            draft.keywords = extract_keywords(tokenizer, &draft.store);
        }
        drafts.push(draft);
    }

    if drafts.is_empty() {
        return Err(StageError::LlmOutputMalformed(
            "no element carried a non-empty store name".to_string(),
        ));
    }

    drafts.truncate(3);
    Ok(drafts)
}

pub(crate) fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let re = Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```$")
        .unwrap_or_else(|_| Regex::new("^$").unwrap());
    if let Some(caps) = re.captures(trimmed) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim().to_string();
        }
    }

    trimmed.replace("```", "").trim().to_string()
}
