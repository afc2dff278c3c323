use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// Raw diagnostics kept when the model's answer cannot be used.
#[derive(Debug, Clone)]
pub struct InsightDiagnosticsError {
    pub provider: Provider,
    pub symbol: String,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl fmt::Display for InsightDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "insight error (provider={:?}, symbol={}, stage={}): {}",
            self.provider, self.symbol, self.stage, self.detail
        )
    }
}

impl std::error::Error for InsightDiagnosticsError {}

/// Expected ways an insight call can fail. Every variant degrades the symbol to
/// traditional scoring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InsightFailure {
    #[error("insight service timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("insight service unreachable: {0}")]
    Transport(String),
    #[error("insight payload malformed: {0}")]
    Malformed(String),
    #[error("insight service unavailable: {0}")]
    Unavailable(String),
}

impl InsightFailure {
    /// Maps a plumbing error onto the failure taxonomy.
    pub fn classify(err: &anyhow::Error, timeout_secs: u64) -> Self {
        if let Some(diag) = err.downcast_ref::<InsightDiagnosticsError>() {
            return match diag.stage {
                "http" => InsightFailure::Transport(diag.detail.clone()),
                _ => InsightFailure::Malformed(diag.detail.clone()),
            };
        }
        if let Some(req) = err.chain().find_map(|e| e.downcast_ref::<reqwest::Error>()) {
            if req.is_timeout() {
                return InsightFailure::Timeout { secs: timeout_secs };
            }
            return InsightFailure::Transport(req.to_string());
        }
        InsightFailure::Malformed(format!("{err:#}"))
    }
}
