use crate::config::Settings;
use crate::domain::contract::LlmInsightPayload;
use crate::llm::error::{InsightDiagnosticsError, InsightFailure};
use crate::llm::json;
use crate::llm::{InsightOutput, InsightRequest, InsightService, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const REPAIR_ATTEMPTS: u32 = 1;

const TOOL_NAME_EMIT_INSIGHT: &str = "emit_insight";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
            timeout_secs,
        })
    }

    async fn create_message(
        &self,
        symbol: &str,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(InsightDiagnosticsError {
                provider: Provider::Anthropic,
                symbol: symbol.to_string(),
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["symbol", "overall_score", "confidence", "thesis", "strengths", "risks",
                         "time_horizon", "position_size_hint", "risk_adjusted_score"],
            "properties": {
                "symbol": {"type": "string"},
                "overall_score": {"type": "number", "minimum": 0, "maximum": 100},
                "confidence": {"type": "number", "minimum": 0, "maximum": 100},
                "thesis": {"type": "string"},
                "strengths": {"type": "array", "maxItems": 5, "items": {"type": "string"}},
                "risks": {"type": "array", "maxItems": 5, "items": {"type": "string"}},
                "time_horizon": {"type": ["string", "null"]},
                "position_size_hint": {"type": ["number", "null"]},
                "risk_adjusted_score": {"type": ["number", "null"]}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_INSIGHT,
            description: "Emit the investment insight for one symbol as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_INSIGHT,
        }
    }

    fn system_prompt() -> String {
        [
            "You are an equity research analyst scoring a single listed instrument.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{",
            "  \"symbol\": \"TICKER\",",
            "  \"overall_score\": 0-100,",
            "  \"confidence\": 0-100,",
            "  \"thesis\": \"one or two sentences\",",
            "  \"strengths\": [\"...\"],",
            "  \"risks\": [\"...\"],",
            "  \"time_horizon\": \"e.g. 1-3 years\" or null,",
            "  \"position_size_hint\": percent of portfolio or null,",
            "  \"risk_adjusted_score\": 0-100 or null",
            "}",
            "Rules:",
            "- symbol must equal the requested symbol",
            "- strengths and risks have at most 5 short entries each",
            "- Base the answer only on the provided context",
        ]
        .join("\n")
    }

    fn user_prompt(request: &InsightRequest) -> String {
        format!(
            "Task: Score {} as an investment.\n\nContext JSON:\n{}",
            request.symbol,
            request.context_json()
        )
    }

    fn repair_prompt(previous_output: &str, expected_symbol: &str) -> String {
        format!(
            "Your previous message was NOT valid JSON for the insight schema.\n\n\
TASK: Output ONLY a single JSON object with keys symbol, overall_score, confidence, thesis,\n\
strengths, risks, time_horizon, position_size_hint, risk_adjusted_score.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- symbol MUST be \"{expected_symbol}\".\n\
- overall_score and confidence MUST be numbers between 0 and 100.\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_payload(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<LlmInsightPayload>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_INSIGHT {
                    let parsed = serde_json::from_value::<LlmInsightPayload>(input.clone())
                        .context("failed to decode tool_use.input into LlmInsightPayload")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    async fn try_parse_with_repairs(
        &self,
        request: &InsightRequest,
        initial_text: String,
        initial_raw_json: serde_json::Value,
    ) -> anyhow::Result<(InsightOutput, serde_json::Value)> {
        let first_err = match json::parse_insight(&initial_text, &request.symbol) {
            Ok(output) => return Ok((output, initial_raw_json)),
            Err(err) => err,
        };

        let mut last_err = first_err;
        let mut last_text = initial_text;
        let mut last_raw_json = initial_raw_json;

        for attempt in 1..=REPAIR_ATTEMPTS {
            let repair_req = CreateMessageRequest {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                system: Some(Self::system_prompt()),
                messages: vec![Message {
                    role: "user",
                    content: Self::repair_prompt(&last_text, &request.symbol),
                }],
                tools: None,
                tool_choice: None,
            };

            let (repair_raw_json, repair_res) =
                self.create_message(&request.symbol, repair_req).await?;
            let repair_text = Self::response_text(&repair_res);
            match json::parse_insight(&repair_text, &request.symbol) {
                Ok(output) => return Ok((output, repair_raw_json)),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        symbol = %request.symbol,
                        error = %err,
                        "insight output still invalid after repair attempt"
                    );
                    last_err = err;
                    last_text = repair_text;
                    last_raw_json = repair_raw_json;
                }
            }
        }

        Err(InsightDiagnosticsError {
            provider: Provider::Anthropic,
            symbol: request.symbol.clone(),
            stage: "parse_after_repair",
            detail: format!("final_error={last_err}"),
            raw_output: Some(last_text),
            raw_response_json: Some(last_raw_json),
        }
        .into())
    }

    pub async fn analyze_with_raw(
        &self,
        request: &InsightRequest,
    ) -> anyhow::Result<(InsightOutput, serde_json::Value)> {
        let req = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content: Self::user_prompt(request),
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        };

        let (raw_json, res) = self.create_message(&request.symbol, req).await?;

        if let Some(payload) = Self::response_tool_payload(&res)? {
            let output = payload
                .validate_and_into_output(&request.symbol)
                .map_err(|err| InsightDiagnosticsError {
                    provider: Provider::Anthropic,
                    symbol: request.symbol.clone(),
                    stage: "validate",
                    detail: format!("{err:#}"),
                    raw_output: None,
                    raw_response_json: Some(raw_json.clone()),
                })?;
            return Ok((output, raw_json));
        }

        // Fallback to text (should be rare with a forced tool choice).
        let text = Self::response_text(&res);
        self.try_parse_with_repairs(request, text, raw_json).await
    }
}

#[async_trait::async_trait]
impl InsightService for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn analyze(&self, request: &InsightRequest) -> Result<InsightOutput, InsightFailure> {
        match self.analyze_with_raw(request).await {
            Ok((output, _raw)) => Ok(output),
            Err(err) => {
                tracing::warn!(symbol = %request.symbol, error = %err, "insight call failed");
                Err(InsightFailure::classify(&err, self.timeout_secs))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}
