use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, TieredCache};
use crate::classify::IntentClassifier;
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::StageError;
use crate::fallback::fallback_recommendations;
use crate::geocode::{GeocodeApi, ADDRESS_UNAVAILABLE};
use crate::keywords::{RegexTokenizer, Tokenizer};
use crate::matcher::match_draft;
use crate::models::{
    mood_score_from_types, CandidateStore, MatchedRecommendation, RecommendParams,
    RecommendResponse, RecommendationDraft, RestaurantInfo, ResultEntry, TestResultResponse,
    UserIntent,
};
use crate::openai::OpenAiClient;
use crate::parser::parse_drafts;
use crate::prompt::build_recommendation_prompt;
use crate::vendors::VendorApi;

/// Message carried in the `error` field when no vendors exist around the
/// coordinate. The HTTP status stays 200.
pub const NO_VENDORS_MESSAGE: &str = "주변에 음식점이 없습니다.";

/// Coalesces concurrent computations that share a key. The first caller for
/// a key computes; callers arriving while it runs subscribe and receive the
/// same value. The map entry is removed before the value is published, so a
/// request landing after publication computes fresh instead of hanging. If
/// the leader's future is dropped mid-compute, the guard removes the entry
/// and subscribers recompute on their own.
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // The guard (and the scrutinee temporary holding it) must drop before
        // any await, or the returned future is not `Send`.
        let rx = match self.flights.lock() {
            Ok(mut flights) => {
                if let Some(tx) = flights.get(key) {
                    Ok(Some(tx.subscribe()))
                } else {
                    let (tx, _) = broadcast::channel(1);
                    flights.insert(key.to_string(), tx);
                    Ok(None)
                }
            }
            Err(_) => Err(()),
        };
        let rx = match rx {
            Ok(rx) => rx,
            Err(()) => return compute().await,
        };

        if let Some(mut rx) = rx {
            return match rx.recv().await {
                Ok(value) => value,
                Err(_) => compute().await,
            };
        }

        let guard = FlightGuard {
            flights: &self.flights,
            key: Some(key.to_string()),
        };
        let value = compute().await;
        if let Some(tx) = guard.finish() {
            let _ = tx.send(value.clone());
        }
        value
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct FlightGuard<'a, T> {
    flights: &'a Mutex<HashMap<String, broadcast::Sender<T>>>,
    key: Option<String>,
}

impl<'a, T> FlightGuard<'a, T> {
    fn finish(mut self) -> Option<broadcast::Sender<T>> {
        let key = self.key.take()?;
        match self.flights.lock() {
            Ok(mut flights) => flights.remove(&key),
            Err(_) => None,
        }
    }
}

impl<'a, T> Drop for FlightGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Ok(mut flights) = self.flights.lock() {
                flights.remove(&key);
            }
        }
    }
}

/// The recommendation pipeline. Classifies intent and fetches candidates
/// concurrently, builds the bounded prompt, invokes the model, parses and
/// resolves drafts back to candidates, and folds every stage failure into
/// the sampled-store fallback. Responses flow through the tiered cache and
/// identical concurrent requests are coalesced.
#[derive(Clone)]
pub struct RecommendService {
    config: AppConfig,
    cache: Arc<TieredCache>,
    db: Database,
    vendors: VendorApi,
    geocoder: GeocodeApi,
    llm: OpenAiClient,
    classifier: IntentClassifier,
    tokenizer: Arc<dyn Tokenizer>,
    llm_gate: Arc<Semaphore>,
    recommend_flights: Arc<SingleFlight<RecommendResponse>>,
    test_flights: Arc<SingleFlight<TestResultResponse>>,
}

impl RecommendService {
    pub fn new(
        config: AppConfig,
        cache: Arc<TieredCache>,
        db: Database,
        vendors: VendorApi,
        geocoder: GeocodeApi,
        llm: OpenAiClient,
    ) -> Self {
        let classifier = IntentClassifier::new(llm.clone(), config.llm.model.as_str());
        let llm_gate = Arc::new(Semaphore::new(config.llm.max_concurrency.max(1)));
        Self {
            config,
            cache,
            db,
            vendors,
            geocoder,
            llm,
            classifier,
            tokenizer: Arc::new(RegexTokenizer::new()),
            llm_gate,
            recommend_flights: Arc::new(SingleFlight::new()),
            test_flights: Arc::new(SingleFlight::new()),
        }
    }

    pub async fn recommend(&self, params: RecommendParams) -> RecommendResponse {
        let key = recommend_cache_key(&params);
        if let Some(hit) = self.cache.get(&key).await {
            match serde_json::from_str::<RecommendResponse>(&hit) {
                Ok(response) => return response,
                Err(err) => {
                    warn!(error = %err, key = %key, "cached recommend payload corrupt, recomputing");
                    self.cache.del(&key).await;
                }
            }
        }

        let service = self.clone();
        let flight_params = params.clone();
        let flight_key = key.clone();
        self.recommend_flights
            .run(&key, move || async move {
                let response = service.compute_recommend(&flight_params).await;
                service
                    .store_outcome(
                        &flight_key,
                        "recommend",
                        &flight_params,
                        &response,
                        response.error.is_none(),
                    )
                    .await;
                response
            })
            .await
    }

    pub async fn test_result(&self, params: RecommendParams) -> TestResultResponse {
        let key = test_result_cache_key(&params);
        if let Some(hit) = self.cache.get(&key).await {
            match serde_json::from_str::<TestResultResponse>(&hit) {
                Ok(response) => return response,
                Err(err) => {
                    warn!(error = %err, key = %key, "cached test payload corrupt, recomputing");
                    self.cache.del(&key).await;
                }
            }
        }

        let service = self.clone();
        let flight_params = params.clone();
        let flight_key = key.clone();
        self.test_flights
            .run(&key, move || async move {
                let response = service.compute_test_result(&flight_params).await;
                service
                    .store_outcome(
                        &flight_key,
                        "test_result",
                        &flight_params,
                        &response,
                        response.error.is_none(),
                    )
                    .await;
                response
            })
            .await
    }

    async fn compute_recommend(&self, params: &RecommendParams) -> RecommendResponse {
        let (category, stores) = tokio::join!(
            self.classifier
                .classify(params.text.as_deref().unwrap_or("")),
            self.fetch_candidates(params.lat, params.lng),
        );

        let candidates = match stores {
            Ok(stores) if !stores.is_empty() => stores,
            Ok(_) => {
                info!(lat = params.lat, lng = params.lng, "no vendors around the coordinate");
                return no_vendors_response(params);
            }
            Err(err) => {
                warn!(stage = err.stage(), error = %err, "candidate fetch failed");
                return no_vendors_response(params);
            }
        };

        let intent = UserIntent {
            raw_text: params.text.clone(),
            category,
            lat: params.lat,
            lng: params.lng,
            mood_score: mood_score_from_types(&params.mood_types),
        };

        let matched = self.resolve(&intent, &candidates, params.dummy.as_deref()).await;
        assemble_recommend_response(params, &matched, intent.mood_score.clone())
    }

    async fn compute_test_result(&self, params: &RecommendParams) -> TestResultResponse {
        let (category, stores, address) = tokio::join!(
            self.classifier
                .classify(params.text.as_deref().unwrap_or("")),
            self.fetch_candidates(params.lat, params.lng),
            self.fetch_address(params.lat, params.lng),
        );

        let candidates = match stores {
            Ok(stores) if !stores.is_empty() => stores,
            Ok(_) => {
                info!(lat = params.lat, lng = params.lng, "no vendors around the coordinate");
                return TestResultResponse {
                    results: Vec::new(),
                    result: None,
                    address,
                    error: Some(NO_VENDORS_MESSAGE.to_string()),
                };
            }
            Err(err) => {
                warn!(stage = err.stage(), error = %err, "candidate fetch failed");
                return TestResultResponse {
                    results: Vec::new(),
                    result: None,
                    address,
                    error: Some(NO_VENDORS_MESSAGE.to_string()),
                };
            }
        };

        let intent = UserIntent {
            raw_text: params.text.clone(),
            category,
            lat: params.lat,
            lng: params.lng,
            mood_score: mood_score_from_types(&params.mood_types),
        };

        let matched = self.resolve(&intent, &candidates, params.dummy.as_deref()).await;
        assemble_test_response(&matched, address)
    }

    /// Runs the model path and folds any stage failure into the fallback.
    async fn resolve(
        &self,
        intent: &UserIntent,
        candidates: &[CandidateStore],
        dummy: Option<&str>,
    ) -> Vec<MatchedRecommendation> {
        let outcome = self.model_recommendations(intent, candidates, dummy).await;
        let mut rng = StdRng::from_entropy();
        recover_with_fallback(
            self.tokenizer.as_ref(),
            outcome,
            intent.raw_text.as_deref(),
            candidates,
            &mut rng,
        )
    }

    async fn model_recommendations(
        &self,
        intent: &UserIntent,
        candidates: &[CandidateStore],
        dummy: Option<&str>,
    ) -> Result<Vec<MatchedRecommendation>, StageError> {
        let nonce = match dummy {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let prompt = {
            let mut rng = StdRng::from_entropy();
            build_recommendation_prompt(
                intent,
                candidates,
                self.config.prompt_candidates,
                &nonce,
                &mut rng,
            )
        };

        let _permit = self
            .llm_gate
            .acquire()
            .await
            .map_err(|_| StageError::LlmInvocation("completion limiter closed".to_string()))?;

        let raw = self
            .llm
            .chat_complete(&self.config.llm.model, None, &prompt, 0.7)
            .await
            .map_err(|err| StageError::LlmInvocation(err.to_string()))?;

        let drafts = parse_drafts(self.tokenizer.as_ref(), &raw)?;
        resolve_drafts(self.tokenizer.as_ref(), drafts, candidates)
    }

    /// Candidate fetch behind the tiered cache. A cache hit skips the
    /// network entirely, even when the cached list is empty.
    async fn fetch_candidates(
        &self,
        lat: f64,
        lng: f64,
    ) -> Result<Vec<CandidateStore>, StageError> {
        let key = stores_cache_key(lat, lng);
        if let Some(hit) = self.cache.get(&key).await {
            match serde_json::from_str::<Vec<CandidateStore>>(&hit) {
                Ok(stores) => return Ok(stores),
                Err(err) => {
                    warn!(error = %err, key = %key, "cached store list corrupt, refetching");
                    self.cache.del(&key).await;
                }
            }
        }

        let stores = self
            .vendors
            .fetch_nearby(self.tokenizer.as_ref(), lat, lng)
            .await
            .map_err(|err| StageError::UpstreamUnavailable(err.to_string()))?;

        match serde_json::to_string(&stores) {
            Ok(payload) => {
                self.cache
                    .set(
                        &key,
                        &payload,
                        "stores",
                        Duration::from_secs(self.config.ttl.store_secs),
                    )
                    .await;
            }
            Err(err) => warn!(error = %err, "store list failed to serialize"),
        }
        Ok(stores)
    }

    /// Reverse geocoding behind the tiered cache. The unavailable placeholder
    /// is never cached, so a transient outage does not stick for an hour.
    async fn fetch_address(&self, lat: f64, lng: f64) -> String {
        let key = address_cache_key(lat, lng);
        if let Some(hit) = self.cache.get(&key).await {
            return hit;
        }

        let address = self.geocoder.reverse_geocode(lat, lng).await;
        if address != ADDRESS_UNAVAILABLE {
            self.cache
                .set(
                    &key,
                    &address,
                    "address",
                    Duration::from_secs(self.config.ttl.address_secs),
                )
                .await;
        }
        address
    }

    async fn store_outcome<T: serde::Serialize>(
        &self,
        key: &str,
        request_type: &'static str,
        params: &RecommendParams,
        response: &T,
        cacheable: bool,
    ) {
        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "response failed to serialize");
                return;
            }
        };

        if cacheable {
            self.cache
                .set(
                    key,
                    &payload,
                    request_type,
                    Duration::from_secs(self.config.ttl.result_secs),
                )
                .await;
        }

        let db = self.db.clone();
        let input = history_input(params);
        let result = serde_json::to_value(response).unwrap_or(serde_json::Value::Null);
        tokio::spawn(async move {
            if let Err(err) = db.record_history(request_type, &input, &result).await {
                warn!(error = %err, "failed to record recommendation history");
            }
        });
    }
}

fn history_input(params: &RecommendParams) -> serde_json::Value {
    json!({
        "text": params.text,
        "lat": params.lat,
        "lng": params.lng,
        "types": params.mood_types,
        "dummy": params.dummy,
        "test_mode": params.test_mode,
    })
}

fn recommend_cache_key(params: &RecommendParams) -> String {
    CacheKey::new("recommend")
        .field("mode", if params.test_mode { "test" } else { "recommend" })
        .field("text", params.text.as_deref().unwrap_or(""))
        .field("lat", params.lat)
        .field("lng", params.lng)
        .field("types", params.mood_types.join(","))
        .field("dummy", params.dummy.as_deref().unwrap_or(""))
        .render()
}

fn test_result_cache_key(params: &RecommendParams) -> String {
    CacheKey::new("test_result")
        .field("text", params.text.as_deref().unwrap_or(""))
        .field("lat", params.lat)
        .field("lng", params.lng)
        .field("types", params.mood_types.join(","))
        .field("dummy", params.dummy.as_deref().unwrap_or(""))
        .render()
}

fn stores_cache_key(lat: f64, lng: f64) -> String {
    CacheKey::new("stores")
        .field("lat", lat)
        .field("lng", lng)
        .render()
}

fn address_cache_key(lat: f64, lng: f64) -> String {
    CacheKey::new("address")
        .field("lat", lat)
        .field("lng", lng)
        .render()
}

/// Resolves each draft against the candidate list, dropping drafts that name
/// a vendor nobody nearby matches. All drafts dropped is a stage failure.
fn resolve_drafts(
    tokenizer: &dyn Tokenizer,
    drafts: Vec<RecommendationDraft>,
    candidates: &[CandidateStore],
) -> Result<Vec<MatchedRecommendation>, StageError> {
    let matched: Vec<MatchedRecommendation> = drafts
        .into_iter()
        .filter_map(|draft| match match_draft(tokenizer, &draft, candidates) {
            Some(store) => Some(MatchedRecommendation {
                draft,
                store: Some(store.clone()),
                via_fallback: false,
            }),
            None => {
                debug!(store = %draft.store, "draft matched no nearby candidate");
                None
            }
        })
        .collect();

    if matched.is_empty() {
        return Err(StageError::NoEntityMatch);
    }
    Ok(matched)
}

/// Folds a failed model path into sampled-store recommendations. The
/// returned list is empty only when the candidate list itself is empty.
fn recover_with_fallback(
    tokenizer: &dyn Tokenizer,
    outcome: Result<Vec<MatchedRecommendation>, StageError>,
    text: Option<&str>,
    candidates: &[CandidateStore],
    rng: &mut impl Rng,
) -> Vec<MatchedRecommendation> {
    match outcome {
        Ok(matched) => matched,
        Err(err) => {
            warn!(
                stage = err.stage(),
                error = %err,
                "recommendation stage failed, sampling stores instead"
            );
            fallback_recommendations(tokenizer, text, candidates, rng)
        }
    }
}

fn result_entry(matched: &MatchedRecommendation) -> ResultEntry {
    let store = matched.store.as_ref();
    ResultEntry {
        store: matched.draft.store.clone(),
        description: matched.draft.description.clone(),
        category: matched.draft.category.clone(),
        keywords: matched.draft.keywords.clone(),
        logo_url: store.map(|s| s.logo_url.clone()).unwrap_or_default(),
        review_avg: store.map(|s| s.review_avg).unwrap_or(0.0),
        address: store.map(|s| s.address.clone()).unwrap_or_default(),
        categories: store.map(|s| s.categories.join(", ")).unwrap_or_default(),
    }
}

fn restaurant_info(store: &CandidateStore) -> RestaurantInfo {
    RestaurantInfo {
        name: store.name.clone(),
        review_avg: if store.review_avg > 0.0 {
            store.review_avg.to_string()
        } else {
            "5점".to_string()
        },
        address: store.address.clone(),
        id: store.id.clone(),
        categories: store.categories.join(", "),
        logo_url: store.logo_url.clone(),
    }
}

fn assemble_recommend_response(
    params: &RecommendParams,
    matched: &[MatchedRecommendation],
    score: Option<BTreeMap<String, u32>>,
) -> RecommendResponse {
    let results: Vec<ResultEntry> = matched.iter().map(result_entry).collect();
    let restaurants: Vec<RestaurantInfo> = matched
        .iter()
        .filter_map(|m| m.store.as_ref())
        .map(restaurant_info)
        .collect();

    let mut response = RecommendResponse {
        result: results.first().cloned(),
        results,
        restaurants,
        text: None,
        lat: None,
        lng: None,
        types: None,
        score: None,
        error: None,
    };

    if params.test_mode {
        response.text = params.text.clone();
        response.lat = Some(params.lat);
        response.lng = Some(params.lng);
        response.types = Some(params.mood_types.clone());
        response.score = score;
    }

    response
}

fn assemble_test_response(
    matched: &[MatchedRecommendation],
    address: String,
) -> TestResultResponse {
    let results: Vec<ResultEntry> = matched.iter().map(result_entry).collect();
    TestResultResponse {
        result: results.first().cloned(),
        results,
        address,
        error: None,
    }
}

fn no_vendors_response(params: &RecommendParams) -> RecommendResponse {
    let mut response =
        assemble_recommend_response(params, &[], mood_score_from_types(&params.mood_types));
    response.error = Some(NO_VENDORS_MESSAGE.to_string());
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::cache::MemoryTier;

    use super::*;

    fn candidate(name: &str) -> CandidateStore {
        CandidateStore {
            id: format!("id-{name}"),
            name: name.to_string(),
            categories: vec!["치킨".to_string(), "야식".to_string()],
            keywords: vec![name.to_string()],
            representative_menu: "후라이드".to_string(),
            tags: Vec::new(),
            review_avg: 4.7,
            address: "서울 강남구".to_string(),
            logo_url: "/media/logo.png".to_string(),
        }
    }

    fn draft(store: &str) -> RecommendationDraft {
        RecommendationDraft {
            store: store.to_string(),
            description: "달콤한 하루를 위한 선택".to_string(),
            category: "치킨".to_string(),
            keywords: vec![store.to_string()],
        }
    }

    fn params(text: Option<&str>) -> RecommendParams {
        RecommendParams {
            text: text.map(|t| t.to_string()),
            lat: 37.5,
            lng: 127.0,
            mood_types: Vec::new(),
            dummy: None,
            test_mode: false,
        }
    }

    fn unreachable_config() -> AppConfig {
        use crate::config::{LlmConfig, TtlConfig};
        AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            data_dir: std::path::PathBuf::from("./data"),
            redis_url: "redis://127.0.0.1:1".to_string(),
            vendor_base_url: "http://127.0.0.1:1".to_string(),
            geocode_base_url: "http://127.0.0.1:1".to_string(),
            geocode_api_key: String::new(),
            fetch_timeout_secs: 1,
            cache_op_timeout_ms: 200,
            prompt_candidates: 10,
            llm: LlmConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                api_key: String::new(),
                model: "gpt-test".to_string(),
                timeout_secs: 1,
                max_concurrency: 2,
            },
            ttl: TtlConfig {
                result_secs: 1800,
                store_secs: 900,
                address_secs: 3600,
            },
        }
    }

    async fn unreachable_service() -> (RecommendService, Arc<TieredCache>) {
        let config = unreachable_config();
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let cache = Arc::new(TieredCache::new(
            Arc::new(MemoryTier::default()),
            db.clone(),
            Duration::from_millis(config.cache_op_timeout_ms),
        ));
        let vendors =
            VendorApi::new(&config.vendor_base_url, Duration::from_secs(1)).unwrap();
        let geocoder = GeocodeApi::new(
            &config.geocode_base_url,
            &config.geocode_api_key,
            Duration::from_secs(1),
        )
        .unwrap();
        let llm = OpenAiClient::new(&config.llm.base_url, "", Duration::from_secs(1)).unwrap();
        let service =
            RecommendService::new(config, cache.clone(), db, vendors, geocoder, llm);
        (service, cache)
    }

    async fn seed_stores(cache: &TieredCache, lat: f64, lng: f64, stores: &[CandidateStore]) {
        let payload = serde_json::to_string(stores).unwrap();
        cache
            .set(
                &stores_cache_key(lat, lng),
                &payload,
                "stores",
                Duration::from_secs(900),
            )
            .await;
    }

    #[test]
    fn unmatched_drafts_are_a_stage_failure() {
        let tokenizer = RegexTokenizer::new();
        let candidates = vec![candidate("교촌치킨"), candidate("맘스터치")];

        let outcome = resolve_drafts(&tokenizer, vec![draft("없는가게")], &candidates);
        assert!(matches!(outcome, Err(StageError::NoEntityMatch)));

        let matched = resolve_drafts(
            &tokenizer,
            vec![draft("없는가게"), draft("교촌치킨")],
            &candidates,
        )
        .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].draft.store, "교촌치킨");
        assert!(!matched[0].via_fallback);
    }

    #[test]
    fn stage_failures_fold_into_sampled_fallback() {
        let tokenizer = RegexTokenizer::new();
        let candidates: Vec<CandidateStore> =
            (0..5).map(|i| candidate(&format!("가게{i}호점"))).collect();
        let mut rng = StdRng::seed_from_u64(11);

        let recovered = recover_with_fallback(
            &tokenizer,
            Err(StageError::LlmInvocation("timed out".to_string())),
            Some("치킨"),
            &candidates,
            &mut rng,
        );
        assert_eq!(recovered.len(), 3);
        assert!(recovered.iter().all(|m| m.via_fallback));

        let passthrough = recover_with_fallback(
            &tokenizer,
            Ok(vec![MatchedRecommendation {
                draft: draft("교촌치킨"),
                store: Some(candidate("교촌치킨")),
                via_fallback: false,
            }]),
            Some("치킨"),
            &candidates,
            &mut rng,
        );
        assert_eq!(passthrough.len(), 1);
        assert!(!passthrough[0].via_fallback);
    }

    #[test]
    fn assembled_response_enriches_from_the_matched_store() {
        let matched = vec![MatchedRecommendation {
            draft: draft("교촌치킨"),
            store: Some(candidate("교촌치킨-강남점")),
            via_fallback: false,
        }];
        let response = assemble_recommend_response(&params(Some("치킨")), &matched, None);

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].categories, "치킨, 야식");
        assert_eq!(response.results[0].logo_url, "/media/logo.png");
        assert_eq!(
            response.result.as_ref().map(|r| r.store.as_str()),
            Some("교촌치킨")
        );
        assert_eq!(response.restaurants.len(), 1);
        assert_eq!(response.restaurants[0].review_avg, "4.7");
        assert!(response.error.is_none());
        assert!(response.text.is_none());

        let serialized = serde_json::to_string(&response).unwrap();
        assert!(!serialized.contains("\"error\""));
    }

    #[test]
    fn unreviewed_stores_render_the_default_grade() {
        let mut store = candidate("신규식당");
        store.review_avg = 0.0;
        assert_eq!(restaurant_info(&store).review_avg, "5점");
    }

    #[test]
    fn test_mode_echoes_request_fields() {
        let mut test_params = params(Some("우울해"));
        test_params.test_mode = true;
        test_params.mood_types = vec!["달달".to_string()];

        let response = assemble_recommend_response(
            &test_params,
            &[],
            mood_score_from_types(&test_params.mood_types),
        );
        assert_eq!(response.text.as_deref(), Some("우울해"));
        assert_eq!(response.lat, Some(37.5));
        assert_eq!(response.types.as_deref(), Some(&["달달".to_string()][..]));
        assert_eq!(
            response.score.as_ref().and_then(|s| s.get("달달")),
            Some(&1)
        );
    }

    #[test]
    fn cache_keys_separate_endpoints_and_nonces() {
        let base = params(Some("치킨"));
        let mut with_dummy = base.clone();
        with_dummy.dummy = Some("n1".to_string());

        assert_ne!(recommend_cache_key(&base), test_result_cache_key(&base));
        assert_ne!(recommend_cache_key(&base), recommend_cache_key(&with_dummy));
        assert_eq!(recommend_cache_key(&base), recommend_cache_key(&base.clone()));
    }

    #[tokio::test]
    async fn single_flight_coalesces_concurrent_callers() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        42u32
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_flight_recomputes_after_completion() {
        let flight = SingleFlight::<u32>::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = flight
                .run("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    7u32
                })
                .await;
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_leader_does_not_wedge_the_key() {
        let flight = SingleFlight::<u32>::new();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            flight.run("k", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                1u32
            }),
        )
        .await;
        assert!(abandoned.is_err());

        let value = flight.run("k", || async { 2u32 }).await;
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn model_outage_still_produces_recommendations() {
        let (service, cache) = unreachable_service().await;
        let stores: Vec<CandidateStore> = ["교촌치킨", "맘스터치", "한솥도시락", "피자스쿨"]
            .iter()
            .map(|name| candidate(name))
            .collect();
        seed_stores(&cache, 37.5, 127.0, &stores).await;

        let response = service.recommend(params(Some("치킨"))).await;

        assert!(response.error.is_none());
        assert!(!response.results.is_empty());
        assert!(response.results.len() <= 3);
        assert!(!response.restaurants.is_empty());
        let names: Vec<&str> = stores.iter().map(|s| s.name.as_str()).collect();
        for entry in &response.results {
            assert!(names.contains(&entry.store.as_str()));
        }
    }

    #[tokio::test]
    async fn computed_responses_are_served_from_cache_afterwards() {
        let (service, cache) = unreachable_service().await;
        seed_stores(&cache, 37.5, 127.0, &[candidate("교촌치킨"), candidate("맘스터치")]).await;

        let first = service.recommend(params(Some("치킨"))).await;
        let second = service.recommend(params(Some("치킨"))).await;

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_candidate_list_reports_the_no_vendors_error() {
        let (service, cache) = unreachable_service().await;
        seed_stores(&cache, 37.5, 127.0, &[]).await;

        let response = service.recommend(params(Some("치킨"))).await;

        assert!(response.results.is_empty());
        assert!(response.restaurants.is_empty());
        assert_eq!(response.error.as_deref(), Some(NO_VENDORS_MESSAGE));
    }

    #[tokio::test]
    async fn test_endpoint_reports_address_even_without_vendors() {
        let (service, cache) = unreachable_service().await;
        seed_stores(&cache, 37.5, 127.0, &[]).await;

        let response = service.test_result(params(Some("치킨"))).await;

        assert!(response.results.is_empty());
        assert_eq!(response.error.as_deref(), Some(NO_VENDORS_MESSAGE));
        assert_eq!(response.address, ADDRESS_UNAVAILABLE);
    }
}
