use thiserror::Error;

/// Failure kinds for the recommendation pipeline. The orchestrator matches on
/// these to decide between the computed result and the fallback path; none of
/// them ever surfaces as a non-200 response.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("candidate provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("model invocation failed: {0}")]
    LlmInvocation(String),

    #[error("model output was not parseable JSON: {0}")]
    LlmOutputMalformed(String),

    #[error("no candidate matched any draft")]
    NoEntityMatch,

    #[error("cache backend unavailable: {0}")]
    CacheBackendUnavailable(String),
}

impl StageError {
    /// Short stage label used in logs.
    pub fn stage(&self) -> &'static str {
        match self {
            StageError::UpstreamUnavailable(_) => "fetch",
            StageError::LlmInvocation(_) => "llm",
            StageError::LlmOutputMalformed(_) => "parse",
            StageError::NoEntityMatch => "match",
            StageError::CacheBackendUnavailable(_) => "cache",
        }
    }
}
