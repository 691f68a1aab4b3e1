use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Food,
    Mood,
    Situation,
    Other,
}

impl IntentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentCategory::Food => "food",
            IntentCategory::Mood => "mood",
            IntentCategory::Situation => "situation",
            IntentCategory::Other => "other",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "음식" | "food" => Some(IntentCategory::Food),
            "기분" | "mood" => Some(IntentCategory::Mood),
            "상황" | "situation" => Some(IntentCategory::Situation),
            "기능" | "other" => Some(IntentCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateStore {
    pub id: String,
    pub name: String,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub representative_menu: String,
    pub tags: Vec<String>,
    pub review_avg: f64,
    pub address: String,
    pub logo_url: String,
}

#[derive(Debug, Clone)]
pub struct UserIntent {
    pub raw_text: Option<String>,
    pub category: IntentCategory,
    pub lat: f64,
    pub lng: f64,
    pub mood_score: Option<BTreeMap<String, u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationDraft {
    #[serde(default)]
    pub store: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MatchedRecommendation {
    pub draft: RecommendationDraft,
    pub store: Option<CandidateStore>,
    pub via_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub store: String,
    pub description: String,
    pub category: String,
    pub keywords: Vec<String>,
    pub logo_url: String,
    pub review_avg: f64,
    pub address: String,
    pub categories: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantInfo {
    pub name: String,
    pub review_avg: String,
    pub address: String,
    pub id: String,
    pub categories: String,
    pub logo_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendResponse {
    pub results: Vec<ResultEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultEntry>,
    pub restaurants: Vec<RestaurantInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<BTreeMap<String, u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultResponse {
    pub results: Vec<ResultEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultEntry>,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendQuery {
    pub text: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub type1: Option<String>,
    pub type2: Option<String>,
    pub type3: Option<String>,
    pub type4: Option<String>,
    pub type5: Option<String>,
    pub type6: Option<String>,
    pub dummy: Option<String>,
}

impl RecommendQuery {
    pub fn mood_types(&self) -> Vec<String> {
        [
            &self.type1,
            &self.type2,
            &self.type3,
            &self.type4,
            &self.type5,
            &self.type6,
        ]
        .into_iter()
        .filter_map(|t| t.clone())
        .filter(|t| !t.is_empty())
        .collect()
    }

    pub fn into_params(self) -> RecommendParams {
        let mood_types = self.mood_types();
        RecommendParams {
            text: normalize_text(self.text.as_deref()),
            lat: self.lat,
            lng: self.lng,
            mood_types,
            dummy: self.dummy.filter(|d| !d.is_empty()),
            test_mode: self.mode == "test",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestResultQuery {
    pub text: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub types: String,
    pub dummy: Option<String>,
}

impl TestResultQuery {
    pub fn mood_types(&self) -> Vec<String> {
        self.types
            .split(',')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }

    pub fn into_params(self) -> RecommendParams {
        let mood_types = self.mood_types();
        RecommendParams {
            text: normalize_text(self.text.as_deref()),
            lat: self.lat,
            lng: self.lng,
            mood_types,
            dummy: self.dummy.filter(|d| !d.is_empty()),
            test_mode: false,
        }
    }
}

fn default_mode() -> String {
    "recommend".to_string()
}

/// Normalized parameters shared by both recommendation endpoints. Query
/// parsing and range validation happen at the HTTP layer; by this point the
/// coordinate is known good and the text is trimmed, with the literal query
/// value `"none"` already collapsed to absent.
#[derive(Debug, Clone)]
pub struct RecommendParams {
    pub text: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub mood_types: Vec<String>,
    pub dummy: Option<String>,
    pub test_mode: bool,
}

fn normalize_text(text: Option<&str>) -> Option<String> {
    let trimmed = text?.trim();
    if trimmed.is_empty() || trimmed == "none" {
        return None;
    }
    Some(trimmed.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub payload: String,
    pub data_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl CacheRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.updated_at).num_seconds() >= self.ttl_seconds
    }
}

/// Builds the tag -> count map the prompt and the test-mode echo use.
pub fn mood_score_from_types(types: &[String]) -> Option<BTreeMap<String, u32>> {
    if types.is_empty() {
        return None;
    }
    let mut score = BTreeMap::new();
    for tag in types {
        *score.entry(tag.clone()).or_insert(0) += 1;
    }
    Some(score)
}
