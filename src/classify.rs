use crate::models::IntentCategory;
use crate::openai::OpenAiClient;
use crate::parser::strip_code_fence;

const DEFAULT_CATEGORY: IntentCategory = IntentCategory::Food;

#[derive(Clone)]
pub struct IntentClassifier {
    client: OpenAiClient,
    model: String,
}

impl IntentClassifier {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Buckets free text into one of the four intent categories. Empty input
    /// and every failure mode resolve to the default category instead of
    /// surfacing an error; the pipeline can always proceed.
    pub async fn classify(&self, text: &str) -> IntentCategory {
        if text.trim().is_empty() {
            return DEFAULT_CATEGORY;
        }

        let prompt = build_classification_prompt(text);
        match self
            .client
            .chat_complete(&self.model, None, &prompt, 0.0)
            .await
        {
            Ok(reply) => parse_category(&reply).unwrap_or_else(|| {
                tracing::warn!("unrecognized intent label in {reply:?}, using default");
                DEFAULT_CATEGORY
            }),
            Err(err) => {
                tracing::warn!("intent classification failed, using default: {err:#}");
                DEFAULT_CATEGORY
            }
        }
    }
}

fn build_classification_prompt(text: &str) -> String {
    format!(
        "사용자가 \"{text}\"라고 입력했어요. 이 입력은 어떤 종류에 해당하나요?\n\n\
         가능한 분류:\n\
         - 기분 (예: 졸려, 우울해, 기분 좋아)\n\
         - 상황 (예: 친구랑 먹을 거, 혼자 있는 날)\n\
         - 기능 (예: 비타민, 피로회복, 속 편한 음식)\n\
         - 음식 (예: 커리, 김치찌개, 매운음식)\n\n\
         딱 하나의 분류만 고르고 결과는 JSON으로 주세요:\n\
         {{ \"type\": \"기분\" }}"
    )
}

/// Accepts the documented `type` field, the legacy `category` field name, or
/// a bare label when the model skips the JSON wrapper entirely.
fn parse_category(reply: &str) -> Option<IntentCategory> {
    let cleaned = strip_code_fence(reply);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned.trim()) {
        let label = value
            .get("type")
            .or_else(|| value.get("category"))
            .and_then(|v| v.as_str())?;
        return IntentCategory::from_label(label);
    }

    IntentCategory::from_label(cleaned.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_type_field() {
        assert_eq!(
            parse_category(r#"{"type": "기분"}"#),
            Some(IntentCategory::Mood)
        );
    }

    #[test]
    fn accepts_legacy_category_field() {
        assert_eq!(
            parse_category(r#"{"category": "상황"}"#),
            Some(IntentCategory::Situation)
        );
    }

    #[test]
    fn strips_code_fences_before_parsing() {
        let reply = "```json\n{\"type\": \"음식\"}\n```";
        assert_eq!(parse_category(reply), Some(IntentCategory::Food));
    }

    #[test]
    fn falls_back_to_bare_label() {
        assert_eq!(parse_category("기능"), Some(IntentCategory::Other));
        assert_eq!(parse_category("  음식  "), Some(IntentCategory::Food));
    }

    #[test]
    fn rejects_unknown_labels_and_garbage() {
        assert_eq!(parse_category(r#"{"type": "야식"}"#), None);
        assert_eq!(parse_category("I think it's about food"), None);
        assert_eq!(parse_category(""), None);
    }

    #[test]
    fn prompt_lists_all_four_categories() {
        let prompt = build_classification_prompt("매운거");
        assert!(prompt.contains("매운거"));
        for label in ["기분", "상황", "기능", "음식"] {
            assert!(prompt.contains(label), "missing label {label}");
        }
        assert!(prompt.contains("\"type\""));
    }
}
