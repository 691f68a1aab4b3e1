use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct TtlConfig {
    pub result_secs: u64,
    pub store_secs: u64,
    pub address_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub redis_url: String,
    pub vendor_base_url: String,
    pub geocode_base_url: String,
    pub geocode_api_key: String,
    pub fetch_timeout_secs: u64,
    pub cache_op_timeout_ms: u64,
    pub prompt_candidates: usize,
    pub llm: LlmConfig,
    pub ttl: TtlConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("FOODREC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("FOODREC_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            data_dir,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            vendor_base_url: env::var("VENDOR_BASE_URL")
                .unwrap_or_else(|_| "https://www.yogiyo.co.kr".to_string()),
            geocode_base_url: env::var("KAKAO_BASE_URL")
                .unwrap_or_else(|_| "https://dapi.kakao.com".to_string()),
            geocode_api_key: env::var("KAKAO_REST_API_KEY").unwrap_or_default(),
            fetch_timeout_secs: env::var("FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            cache_op_timeout_ms: env::var("CACHE_OP_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            prompt_candidates: env::var("PROMPT_CANDIDATES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            llm: LlmConfig {
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
                timeout_secs: env::var("LLM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
                max_concurrency: env::var("LLM_MAX_CONCURRENCY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(4),
            },
            ttl: TtlConfig {
                result_secs: env::var("RESULT_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1_800),
                store_secs: env::var("STORE_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(900),
                address_secs: env::var("ADDRESS_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3_600),
            },
        }
    }

    pub fn sqlite_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.data_dir.join("foodrec.sqlite3").display()
        )
    }
}
