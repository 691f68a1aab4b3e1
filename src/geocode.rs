use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::warn;

/// Placeholder returned whenever the coordinate cannot be resolved. Address
/// lookup is cosmetic, so every failure mode degrades to this string instead
/// of surfacing an error to the caller.
pub const ADDRESS_UNAVAILABLE: &str = "주소 정보를 가져올 수 없습니다.";

/// Reverse-geocoding client for the Kakao local API.
#[derive(Clone)]
pub struct GeocodeApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeocodeApi {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building geocode http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Resolves a coordinate to a human-readable address, or the fixed
    /// placeholder when the lookup fails for any reason.
    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> String {
        match self.try_reverse_geocode(lat, lng).await {
            Ok(Some(address)) => address,
            Ok(None) => ADDRESS_UNAVAILABLE.to_string(),
            Err(err) => {
                warn!(error = %err, lat, lng, "reverse geocode failed");
                ADDRESS_UNAVAILABLE.to_string()
            }
        }
    }

    async fn try_reverse_geocode(&self, lat: f64, lng: f64) -> Result<Option<String>> {
        let url = format!(
            "{}/v2/local/geo/coord2address.json?x={lng}&y={lat}",
            self.base_url
        );
        let resp = self
            .client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("KakaoAK {}", self.api_key),
            )
            .send()
            .await
            .context("sending reverse geocode request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("reverse geocode returned {status}: {}", body.trim());
        }

        let value = resp
            .json::<serde_json::Value>()
            .await
            .context("decoding reverse geocode response")?;
        Ok(extract_address(&value))
    }
}

fn extract_address(value: &serde_json::Value) -> Option<String> {
    value
        .get("documents")?
        .as_array()?
        .first()?
        .get("address")?
        .get("address_name")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_first_document_address_name() {
        let payload = json!({
            "documents": [
                {"address": {"address_name": "서울 강남구 역삼동"}},
                {"address": {"address_name": "서울 강남구"}}
            ]
        });
        assert_eq!(
            extract_address(&payload),
            Some("서울 강남구 역삼동".to_string())
        );
    }

    #[test]
    fn empty_or_malformed_documents_yield_none() {
        assert_eq!(extract_address(&json!({"documents": []})), None);
        assert_eq!(extract_address(&json!({"documents": [{}]})), None);
        assert_eq!(extract_address(&json!({"error": "unauthorized"})), None);
        assert_eq!(extract_address(&json!([1, 2])), None);
    }
}
