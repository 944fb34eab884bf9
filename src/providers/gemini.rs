use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{
    Config, CRITIC_SYSTEM_PROMPT, IMAGE_GENERATION_SYSTEM_PROMPT, IMAGE_REFERENCE_SYSTEM_PROMPT,
    PROMPT_OPTIMIZER_SYSTEM_PROMPT, REFINER_SYSTEM_PROMPT, VIDEO_PROMPT_TEMPLATE,
};
use crate::domain::{
    BackgroundMode, CritiqueResult, GeneratedImage, GenerationBrief, ReferenceImage,
    RefinementTrigger, TaskSnapshot, TaskStatus,
};
use crate::error::{PipelineError, ProviderError};
use crate::providers::media::{detect_mime_type, download_artifact, truncate_for_log};
use crate::providers::{
    ImageCritic, ImageGenerator, PromptOptimizer, PromptRefiner, VideoGenerator, VideoRequest,
};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_provider_timing;

const PROVIDER: &str = "gemini";
const VIDEO_ASPECT_RATIO: &str = "16:9";

#[derive(Debug, Clone)]
pub struct GeminiImageConfig {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(#[allow(dead_code)] IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct VeoOperation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<VeoOperationError>,
    response: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VeoOperationError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CritiqueWire {
    score: Value,
    #[serde(default)]
    feedback: Value,
    #[serde(default)]
    suggestions: Value,
}

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid fence regex"));

/// Gemini-backed prompt, image, critique, refine and Veo video adapters.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    text_model: String,
    critic_model: String,
    image_model: String,
    video_model: String,
    image_config: GeminiImageConfig,
    safety_profile: String,
    temperature: f32,
    request_timeout: Duration,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("critic_model", &self.critic_model)
            .field("image_model", &self.image_model)
            .field("video_model", &self.video_model)
            .field("image_config", &self.image_config)
            .field("safety_profile", &self.safety_profile)
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.trim().to_string(),
            base_url: config.gemini_base_url.clone(),
            text_model: config.gemini_text_model.clone(),
            critic_model: config.gemini_critic_model.clone(),
            image_model: config.gemini_image_model.clone(),
            video_model: config.gemini_video_model.clone(),
            image_config: GeminiImageConfig {
                aspect_ratio: Some(config.gemini_image_aspect_ratio.clone()),
                image_size: Some(config.gemini_image_size.clone()),
            },
            safety_profile: config.gemini_safety_settings.clone(),
            temperature: config.gemini_temperature,
            request_timeout: Duration::from_secs(config.gemini_request_timeout_seconds.max(1)),
        }
    }

    fn redact(&self, text: &str) -> String {
        if self.api_key.is_empty() {
            return text.to_string();
        }
        text.replace(&self.api_key, "[redacted]")
    }

    async fn call_api(
        &self,
        model: &str,
        payload: Value,
        system_prompt_label: Option<&str>,
    ) -> Result<GeminiResponse, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload, system_prompt_label);
            debug!(target: "provider.gemini", model = model, payload = %payload_summary);
        }

        let value: GeminiResponse = self.post_json(&url, &payload).await?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "provider.gemini", model = model, response = %response_summary);
        }

        if let Some(reason) = value
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(ProviderError::rejected(
                PROVIDER,
                format!("prompt blocked by Gemini ({reason})"),
            ));
        }

        Ok(value)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        payload: &Value,
    ) -> Result<T, ProviderError> {
        let response = get_http_client()
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.request_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        self.decode(response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = get_http_client()
            .get(url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        self.decode(response).await
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        let err_text = self.redact(&err.to_string());
        warn!(
            "Gemini request failed to send: {} (timeout={}, connect={}, status={:?})",
            err_text,
            err.is_timeout(),
            err.is_connect(),
            err.status()
        );
        ProviderError::transport(PROVIDER, err_text)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            let detail = message.unwrap_or(body_summary);
            return Err(ProviderError::status(PROVIDER, status, self.redact(&detail)));
        }

        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::transport(PROVIDER, self.redact(&err.to_string())))?;
        serde_json::from_str::<T>(&body).map_err(|err| {
            ProviderError::malformed(
                PROVIDER,
                format!(
                    "unexpected response shape: {err}; body={}",
                    truncate_for_log(&body, 400)
                ),
            )
        })
    }

    fn text_generation_config(&self) -> Value {
        json!({ "temperature": self.temperature })
    }
}

#[async_trait]
impl PromptOptimizer for GeminiClient {
    async fn optimize(&self, brief: &GenerationBrief) -> Result<String, PipelineError> {
        let parts = build_parts(&brief.render(), brief.reference_image.as_ref());
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": PROMPT_OPTIMIZER_SYSTEM_PROMPT }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": self.text_generation_config(),
            "safetySettings": build_safety_settings(&self.safety_profile),
        });

        let model = self.text_model.as_str();
        log_provider_timing(PROVIDER, model, "optimize_prompt", None, || async {
            let response = self
                .call_api(model, payload, Some("prompt_optimizer_system_prompt"))
                .await?;
            let text = extract_text_from_response(response);
            if text.trim().is_empty() {
                return Err(PipelineError::NoContent(PROVIDER));
            }
            Ok(text.trim().to_string())
        })
        .await
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<GeneratedImage, PipelineError> {
        let system_instruction = if reference.is_some() {
            IMAGE_REFERENCE_SYSTEM_PROMPT
        } else {
            IMAGE_GENERATION_SYSTEM_PROMPT
        };
        let parts = build_parts(prompt, reference);
        let mut generation_config = json!({
            "responseModalities": ["TEXT", "IMAGE"]
        });
        if let Some(image_config) = build_image_config(Some(&self.image_config)) {
            if let Some(config_object) = generation_config.as_object_mut() {
                config_object.insert("imageConfig".to_string(), image_config);
            }
        }

        let payload = json!({
            "systemInstruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
            "safetySettings": build_safety_settings(&self.safety_profile),
        });

        let model = self.image_model.as_str();
        let metadata = json!({ "reference": reference.is_some() });
        log_provider_timing(PROVIDER, model, "generate_image", Some(metadata), || async {
            let response = self
                .call_api(model, payload, Some("image_generation_system_prompt"))
                .await?;
            extract_image_from_response(response)
                .ok_or_else(|| PipelineError::NoImageData(format!("Gemini (model: {model})")))
        })
        .await
    }
}

#[async_trait]
impl ImageCritic for GeminiClient {
    async fn critique(
        &self,
        original_brief: &str,
        image: &GeneratedImage,
    ) -> Result<CritiqueResult, PipelineError> {
        let text = format!(
            "ORIGINAL BRIEF:\n{}\n\nReview the attached image against this brief.",
            original_brief.trim()
        );
        let parts = vec![json!({ "text": text }), inline_image_part(&image.bytes, &image.mime_type)];
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": CRITIC_SYSTEM_PROMPT }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "score": { "type": "INTEGER" },
                        "feedback": { "type": "STRING" },
                        "suggestions": { "type": "STRING" }
                    },
                    "required": ["score", "feedback", "suggestions"]
                }
            },
            "safetySettings": build_safety_settings(&self.safety_profile),
        });

        let model = self.critic_model.as_str();
        log_provider_timing(PROVIDER, model, "critique_image", None, || async {
            let response = self
                .call_api(model, payload, Some("critic_system_prompt"))
                .await?;
            parse_critique(&extract_text_from_response(response))
        })
        .await
    }
}

#[async_trait]
impl PromptRefiner for GeminiClient {
    async fn refine(
        &self,
        current_prompt: &str,
        trigger: &RefinementTrigger,
    ) -> Result<String, PipelineError> {
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": REFINER_SYSTEM_PROMPT }] },
            "contents": [{ "role": "user", "parts": [{ "text": build_refinement_request(current_prompt, trigger) }] }],
            "generationConfig": self.text_generation_config(),
            "safetySettings": build_safety_settings(&self.safety_profile),
        });

        let model = self.text_model.as_str();
        let metadata = json!({ "human_feedback": trigger.is_human() });
        log_provider_timing(PROVIDER, model, "refine_prompt", Some(metadata), || async {
            let response = self
                .call_api(model, payload, Some("refiner_system_prompt"))
                .await?;
            let text = extract_text_from_response(response);
            if text.trim().is_empty() {
                warn!("Gemini refiner returned no text; keeping the current prompt");
                return Ok(current_prompt.to_string());
            }
            Ok(text.trim().to_string())
        })
        .await
    }
}

#[async_trait]
impl VideoGenerator for GeminiClient {
    async fn start(&self, request: &VideoRequest<'_>) -> Result<String, PipelineError> {
        let prompt = build_video_prompt(
            request.character_name,
            request.background_mode,
            request.scenario,
        );
        let payload = json!({
            "instances": [{
                "prompt": prompt,
                "image": {
                    "bytesBase64Encoded": general_purpose::STANDARD.encode(&request.image.bytes),
                    "mimeType": request.image.mime_type,
                }
            }],
            "parameters": { "aspectRatio": VIDEO_ASPECT_RATIO }
        });

        let model = self.video_model.as_str();
        let url = format!("{}/models/{}:predictLongRunning", self.base_url, model);
        log_provider_timing(PROVIDER, model, "start_video", None, || async {
            let operation: VeoOperation = self.post_json(&url, &payload).await?;
            if operation.name.trim().is_empty() {
                return Err(ProviderError::malformed(PROVIDER, "video operation has no name").into());
            }
            Ok(operation.name)
        })
        .await
    }

    async fn status(&self, operation: &str) -> Result<TaskSnapshot<String>, PipelineError> {
        let url = format!("{}/{}", self.base_url, operation.trim_start_matches('/'));
        let operation: VeoOperation = self.get_json(&url).await?;
        Ok(video_snapshot(operation))
    }

    async fn download(&self, uri: &str) -> Result<Vec<u8>, PipelineError> {
        download_artifact(uri, "video", Some(("x-goog-api-key", self.api_key.as_str()))).await
    }
}

fn video_snapshot(operation: VeoOperation) -> TaskSnapshot<String> {
    if !operation.done {
        return TaskSnapshot::without_output(TaskStatus::Running, 0);
    }

    if let Some(error) = operation.error {
        warn!(
            "Video operation {} failed: code={} message={}",
            operation.name, error.code, error.message
        );
        return TaskSnapshot::without_output(TaskStatus::Failed, 100);
    }

    let uri = operation.response.as_ref().and_then(|response| {
        response
            .pointer("/generateVideoResponse/generatedSamples/0/video/uri")
            .or_else(|| response.pointer("/generatedVideos/0/video/uri"))
            .and_then(|value| value.as_str())
            .map(str::to_string)
    });

    match uri {
        Some(uri) => TaskSnapshot::success(uri),
        None => {
            let filtered = operation
                .response
                .as_ref()
                .and_then(|response| response.pointer("/generateVideoResponse/raiMediaFilteredReasons"))
                .map(|value| value.to_string());
            warn!(
                "Video operation {} finished without a video (filtered={:?})",
                operation.name, filtered
            );
            TaskSnapshot::without_output(TaskStatus::Banned, 100)
        }
    }
}

pub fn build_video_prompt(name: &str, mode: BackgroundMode, scenario: &str) -> String {
    let background = match mode {
        BackgroundMode::Studio => "Plain neutral studio backdrop with soft even lighting.".to_string(),
        BackgroundMode::Immersive if !scenario.trim().is_empty() => {
            format!("The character stands inside this setting: {}.", scenario.trim())
        }
        BackgroundMode::Immersive => "The character stands inside a matching environment.".to_string(),
        BackgroundMode::Gameplay => {
            "Clean game-engine preview stage with a subtle floor grid.".to_string()
        }
    };
    VIDEO_PROMPT_TEMPLATE
        .replace("{name}", name.trim())
        .replace("{background}", &background)
}

pub fn build_refinement_request(current_prompt: &str, trigger: &RefinementTrigger) -> String {
    let review = match trigger {
        RefinementTrigger::AutomaticCritique(critique) => format!(
            "REVIEW (automatic critique, score {}/100):\nFeedback: {}\nSuggestions: {}",
            critique.score,
            critique.feedback.trim(),
            critique.suggestions.trim()
        ),
        RefinementTrigger::HumanFeedback(feedback) => format!(
            "REVIEW (HUMAN FEEDBACK, highest priority):\n{}",
            feedback.trim()
        ),
    };
    format!("CURRENT PROMPT:\n{}\n\n{}", current_prompt.trim(), review)
}

pub fn parse_critique(text: &str) -> Result<CritiqueResult, PipelineError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::NoCritique("empty response".to_string()));
    }
    let body = JSON_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    let wire: CritiqueWire = serde_json::from_str(body).map_err(|err| {
        PipelineError::NoCritique(format!("{err}: {}", truncate_for_log(body, 200)))
    })?;

    let score = match &wire.score {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|score| score.is_finite())
    .ok_or_else(|| PipelineError::NoCritique(format!("invalid score {}", wire.score)))?;

    Ok(CritiqueResult::new(
        score.round().clamp(0.0, 100.0) as u8,
        value_to_text(&wire.feedback),
        value_to_text(&wire.suggestions),
    ))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using standard defaults.",
                profile
            );
            "BLOCK_MEDIUM_AND_ABOVE"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

fn build_image_config(config: Option<&GeminiImageConfig>) -> Option<Value> {
    let config = config?;
    let mut map = Map::new();

    if let Some(aspect_ratio) = config.aspect_ratio.as_deref() {
        let trimmed = aspect_ratio.trim();
        if !trimmed.is_empty() {
            map.insert("aspectRatio".to_string(), json!(trimmed));
        }
    }

    if let Some(image_size) = config.image_size.as_deref() {
        let trimmed = image_size.trim();
        if !trimmed.is_empty() {
            map.insert("imageSize".to_string(), json!(trimmed));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn inline_image_part(bytes: &[u8], mime_type: &str) -> Value {
    let mime_type = if mime_type.trim().is_empty() {
        detect_mime_type(bytes).unwrap_or_else(|| "image/png".to_string())
    } else {
        normalize_image_mime(mime_type)
    };
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": general_purpose::STANDARD.encode(bytes)
        }
    })
}

fn normalize_image_mime(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        _ => lowered,
    }
}

fn build_parts(text: &str, reference: Option<&ReferenceImage>) -> Vec<Value> {
    let mut parts = vec![json!({ "text": text })];
    if let Some(reference) = reference {
        if reference.bytes.is_empty() {
            warn!("Skipping empty reference image");
        } else {
            parts.push(inline_image_part(&reference.bytes, &reference.mime_type));
        }
    }
    parts
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value, system_prompt_label: Option<&str>) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        let label = system_prompt_label.unwrap_or("inline_system_prompt");
        summary.insert(
            "systemInstruction".to_string(),
            Value::String(label.to_string()),
        );
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;
    let mut finish_reasons = Vec::new();

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        if let Some(reason) = &candidate.finish_reason {
            finish_reasons.push(reason.clone());
        }
        if let Some(content) = &candidate.content {
            if let Some(parts) = &content.parts {
                for part in parts {
                    match part {
                        GeminiPart::Text { text } => {
                            text_parts += 1;
                            if text_preview.is_none() && !text.trim().is_empty() {
                                text_preview = Some(truncate_for_log(text, 200));
                            }
                        }
                        GeminiPart::InlineData { inline_data } => {
                            if inline_data.mime_type.starts_with("image/") {
                                image_parts += 1;
                            }
                        }
                        GeminiPart::Other(_) => {}
                    }
                }
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview,
        "finishReasons": finish_reasons,
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::Text { text } = part {
                        if !text.trim().is_empty() {
                            text_parts.push(text);
                        }
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_image_from_response(response: GeminiResponse) -> Option<GeneratedImage> {
    for candidate in response.candidates.unwrap_or_default() {
        let Some(parts) = candidate.content.and_then(|content| content.parts) else {
            continue;
        };
        for part in parts {
            let GeminiPart::InlineData { inline_data } = part else {
                continue;
            };
            if !inline_data.mime_type.starts_with("image/") {
                continue;
            }
            match general_purpose::STANDARD.decode(inline_data.data) {
                Ok(bytes) if !bytes.is_empty() => {
                    return Some(GeneratedImage::new(bytes, inline_data.mime_type));
                }
                Ok(_) => {}
                Err(err) => warn!("Discarding undecodable Gemini image part: {}", err),
            }
        }
    }
    None
}
