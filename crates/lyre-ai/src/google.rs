use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, LyreAiError, Message, MessageRole,
    StreamDeltaHandler,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
/// Public struct `GeminiConfig` used across Lyre components.
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
/// Public struct `GeminiClient` used across Lyre components.
///
/// One client per API credential; each request is a single attempt. Quota
/// rotation across credentials happens a layer up, so errors here surface
/// unretried.
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LyreAiError> {
        if config.api_key.trim().is_empty() {
            return Err(LyreAiError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn generate_content_url(&self, model: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/models/{model}:generateContent")
    }

    fn stream_generate_content_url(&self, model: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/models/{model}:streamGenerateContent")
    }

    fn cached_contents_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/cachedContents")
    }

    /// Creates a server-side cached content resource and returns its name.
    ///
    /// The caller supplies the full request body; accepted shapes differ
    /// across API revisions, so shape selection lives with the caller.
    pub async fn create_cached_content(&self, body: &Value) -> Result<String, LyreAiError> {
        let url = self.cached_contents_url();
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(LyreAiError::HttpStatus {
                status: status.as_u16(),
                body: raw,
            });
        }
        parse_cached_content_response(&raw)
    }

    async fn complete_with_mode(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, LyreAiError> {
        let body = build_generate_content_body(&request);
        let stream_mode = on_delta.is_some();
        let url = if stream_mode {
            self.stream_generate_content_url(&request.model)
        } else {
            self.generate_content_url(&request.model)
        };

        let mut query = vec![("key", self.config.api_key.as_str())];
        if stream_mode {
            query.push(("alt", "sse"));
        }
        let response = self
            .client
            .post(&url)
            .query(&query)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await?;
            return Err(LyreAiError::HttpStatus {
                status: status.as_u16(),
                body: raw,
            });
        }

        if let Some(delta_handler) = on_delta {
            let is_event_stream = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_ascii_lowercase().contains("text/event-stream"))
                .unwrap_or(false);
            if is_event_stream {
                return parse_generate_content_stream_response(response, delta_handler).await;
            }

            // Some endpoints answer a stream request with a complete body;
            // deliver it as a single delta.
            let raw = response.text().await?;
            let parsed = parse_generate_content_response(&raw)?;
            if !parsed.text.is_empty() {
                delta_handler(parsed.text.clone());
            }
            return Ok(parsed);
        }

        let raw = response.text().await?;
        parse_generate_content_response(&raw)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LyreAiError> {
        self.complete_with_mode(request, None).await
    }

    async fn complete_with_stream(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, LyreAiError> {
        self.complete_with_mode(request, on_delta).await
    }
}

fn build_generate_content_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "contents": to_gemini_contents(&request.messages),
    });

    if let Some(system) = request.system_instruction.as_deref() {
        if !system.trim().is_empty() {
            body["systemInstruction"] = json!({
                "parts": [{ "text": system }],
            });
        }
    }

    if let Some(cached) = request.cached_content.as_deref() {
        body["cachedContent"] = json!(cached);
    }

    let mut tools = Vec::new();
    if request.tools.web_search {
        tools.push(json!({ "googleSearch": {} }));
    }
    if request.tools.url_context {
        tools.push(json!({ "urlContext": {} }));
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
    }

    if let Some(temperature) = request.temperature {
        body["generationConfig"] = json!({ "temperature": temperature });
    }

    body
}

fn to_gemini_contents(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .filter_map(|message| {
                if message.text.trim().is_empty() {
                    return None;
                }
                let role = match message.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                };
                Some(json!({
                    "role": role,
                    "parts": [{ "text": message.text }],
                }))
            })
            .collect(),
    )
}

fn parse_cached_content_response(raw: &str) -> Result<String, LyreAiError> {
    let parsed: CachedContentResponse = serde_json::from_str(raw)?;
    match parsed.name {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => Err(LyreAiError::InvalidResponse(
            "cached content response carried no resource name".to_string(),
        )),
    }
}

fn parse_generate_content_response(raw: &str) -> Result<ChatResponse, LyreAiError> {
    let parsed: GenerateContentResponse = serde_json::from_str(raw)?;
    let candidate = parsed
        .candidates
        .and_then(|mut candidates| candidates.drain(..).next())
        .ok_or_else(|| {
            LyreAiError::InvalidResponse("response contained no candidates".to_string())
        })?;

    let parts = candidate
        .content
        .and_then(|content| content.parts)
        .unwrap_or_default();
    let mut text = String::new();
    for part in parts {
        if let Some(part_text) = part.text {
            text.push_str(&part_text);
        }
    }

    let usage = parsed
        .usage_metadata
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            total_tokens: usage.total_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        text,
        finish_reason: candidate.finish_reason,
        usage,
    })
}

async fn parse_generate_content_stream_response(
    response: reqwest::Response,
    on_delta: StreamDeltaHandler,
) -> Result<ChatResponse, LyreAiError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut text = String::new();
    let mut finish_reason = None;
    let mut usage = ChatUsage::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let fragment = std::str::from_utf8(chunk.as_ref()).map_err(|error| {
            LyreAiError::InvalidResponse(format!("invalid UTF-8 in Gemini stream response: {error}"))
        })?;
        buffer.push_str(fragment);

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer.drain(..=pos);
            if line.is_empty() {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                apply_gemini_stream_data(
                    data.trim(),
                    &on_delta,
                    &mut text,
                    &mut finish_reason,
                    &mut usage,
                )?;
            }
        }
    }

    let trailing = buffer.trim();
    if let Some(data) = trailing.strip_prefix("data:") {
        apply_gemini_stream_data(
            data.trim(),
            &on_delta,
            &mut text,
            &mut finish_reason,
            &mut usage,
        )?;
    }

    Ok(ChatResponse {
        text,
        finish_reason,
        usage,
    })
}

fn apply_gemini_stream_data(
    data: &str,
    on_delta: &StreamDeltaHandler,
    text: &mut String,
    finish_reason: &mut Option<String>,
    usage: &mut ChatUsage,
) -> Result<(), LyreAiError> {
    if data.is_empty() {
        return Ok(());
    }

    let chunk: GenerateContentResponse = serde_json::from_str(data).map_err(|error| {
        LyreAiError::InvalidResponse(format!("failed to parse Gemini stream chunk: {error}"))
    })?;
    if let Some(chunk_usage) = chunk.usage_metadata {
        usage.input_tokens = chunk_usage.prompt_token_count.unwrap_or(usage.input_tokens);
        usage.output_tokens = chunk_usage
            .candidates_token_count
            .unwrap_or(usage.output_tokens);
        usage.total_tokens = chunk_usage.total_token_count.unwrap_or(usage.total_tokens);
    }

    if let Some(candidates) = chunk.candidates {
        for candidate in candidates {
            if let Some(reason) = candidate.finish_reason {
                *finish_reason = Some(reason);
            }

            let Some(parts) = candidate.content.and_then(|content| content.parts) else {
                continue;
            };
            for part in parts {
                if let Some(delta_text) = part.text {
                    if !delta_text.is_empty() {
                        text.push_str(&delta_text);
                        on_delta(delta_text);
                    }
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<GenerateContentCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GenerateContentUsage>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: Option<GenerateContentContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentContent {
    parts: Option<Vec<GenerateContentPart>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CachedContentResponse {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}
