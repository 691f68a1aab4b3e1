use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::keywords::{extract_keywords, Tokenizer};
use crate::models::CandidateStore;

/// Client for the delivery-platform store search. The platform has no public
/// API, so requests carry ordinary browser headers and the response shape is
/// treated as untrusted: anything that is not a JSON array maps to an empty
/// candidate list rather than an error.
#[derive(Clone)]
pub struct VendorApi {
    client: reqwest::Client,
    base_url: String,
}

impl VendorApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building vendor http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches delivery-capable stores around the coordinate. Keywords are
    /// derived from store names at ingest so every later stage sees the same
    /// token set.
    pub async fn fetch_nearby(
        &self,
        tokenizer: &dyn Tokenizer,
        lat: f64,
        lng: f64,
    ) -> Result<Vec<CandidateStore>> {
        let url = format!(
            "{}/api/v1/restaurants?lat={lat}&lng={lng}&page=0&serving_type=delivery",
            self.base_url
        );
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0")
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_LANGUAGE, "ko-KR,ko;q=0.9")
            .header(reqwest::header::REFERER, "https://www.yogiyo.co.kr/")
            .send()
            .await
            .context("sending vendor search request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("vendor search returned {status}: {}", body.trim());
        }

        let value = resp
            .json::<serde_json::Value>()
            .await
            .context("decoding vendor search response")?;
        Ok(map_items(tokenizer, &value))
    }
}

#[derive(Debug, Deserialize)]
struct VendorItem {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    representative_menus: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    review_avg: f64,
    #[serde(default)]
    address: String,
    #[serde(default)]
    logo_url: String,
}

fn map_items(tokenizer: &dyn Tokenizer, value: &serde_json::Value) -> Vec<CandidateStore> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<VendorItem>(item.clone()).ok())
        .map(|item| {
            let id = match &item.id {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => String::new(),
            };
            let keywords = extract_keywords(tokenizer, &item.name);
            CandidateStore {
                id,
                name: item.name,
                categories: item.categories,
                keywords,
                representative_menu: item.representative_menus,
                tags: item.tags,
                review_avg: item.review_avg,
                address: item.address,
                logo_url: item.logo_url,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::keywords::RegexTokenizer;

    use super::*;

    #[test]
    fn maps_store_fields_and_derives_keywords() {
        let tokenizer = RegexTokenizer::new();
        let payload = json!([{
            "id": 128500,
            "name": "교촌치킨-강남점",
            "categories": ["치킨", "야식"],
            "representative_menus": "허니콤보",
            "tags": ["신규"],
            "review_avg": 4.7,
            "address": "서울 강남구",
            "logo_url": "/media/logo.png"
        }]);
        let stores = map_items(&tokenizer, &payload);
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].id, "128500");
        assert_eq!(stores[0].name, "교촌치킨-강남점");
        assert_eq!(
            stores[0].keywords,
            vec!["교촌치킨".to_string(), "강남점".to_string()]
        );
        assert_eq!(stores[0].review_avg, 4.7);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let tokenizer = RegexTokenizer::new();
        let stores = map_items(&tokenizer, &json!([{"name": "맘스터치"}]));
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].id, "");
        assert!(stores[0].categories.is_empty());
        assert_eq!(stores[0].review_avg, 0.0);
    }

    #[test]
    fn non_array_payloads_yield_no_candidates() {
        let tokenizer = RegexTokenizer::new();
        assert!(map_items(&tokenizer, &json!({"error": "blocked"})).is_empty());
        assert!(map_items(&tokenizer, &json!("nope")).is_empty());
    }
}
