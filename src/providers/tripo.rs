use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::{GeneratedImage, TaskSnapshot, TaskStatus};
use crate::error::{PipelineError, ProviderError};
use crate::providers::media::{download_artifact, truncate_for_log};
use crate::providers::{ModelConverter, ModelOptions, ModelOutput, UploadedImage};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_provider_timing;

const PROVIDER: &str = "tripo";
const MODEL_LABEL: &str = "image_to_model";

/// Every Tripo response wraps its payload in `{code, data}` with `code == 0` on success.
#[derive(Debug, Deserialize)]
struct TripoEnvelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct TripoTask {
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    output: Option<TripoTaskOutput>,
}

#[derive(Debug, Deserialize)]
struct TripoTaskOutput {
    model: Option<String>,
    base_model: Option<String>,
    pbr_model: Option<String>,
    rendered_image: Option<String>,
}

#[derive(Clone)]
pub struct TripoClient {
    api_key: String,
    base_url: String,
    request_timeout: Duration,
}

impl fmt::Debug for TripoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripoClient")
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl TripoClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.tripo_api_key.trim().to_string(),
            base_url: config.tripo_base_url.clone(),
            request_timeout: Duration::from_secs(120),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let response = request
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    "Tripo request failed to send: timeout={}, connect={}",
                    err.is_timeout(),
                    err.is_connect()
                );
                ProviderError::transport(PROVIDER, err.without_url().to_string())
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(target: "provider.tripo", status = %status, body = %truncate_for_log(&body, 1000));

        if !status.is_success() {
            let detail = serde_json::from_str::<TripoEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| truncate_for_log(body.trim(), 400));
            warn!("Tripo API error: status={}, body={}", status, detail);
            return Err(ProviderError::status(PROVIDER, status, detail));
        }

        unwrap_envelope(&body)
    }
}

fn unwrap_envelope(body: &str) -> Result<Value, ProviderError> {
    let envelope: TripoEnvelope = serde_json::from_str(body).map_err(|err| {
        ProviderError::malformed(
            PROVIDER,
            format!("unexpected response shape: {err}; body={}", truncate_for_log(body, 400)),
        )
    })?;

    if envelope.code != 0 {
        let mut message = format!(
            "code {}: {}",
            envelope.code,
            envelope.message.unwrap_or_else(|| "no message".to_string())
        );
        if let Some(suggestion) = envelope.suggestion.filter(|value| !value.trim().is_empty()) {
            message.push_str(&format!(" ({suggestion})"));
        }
        return Err(ProviderError::rejected(PROVIDER, message));
    }

    Ok(envelope.data)
}

fn required_string(data: &Value, field: &str) -> Result<String, ProviderError> {
    data.get(field)
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::malformed(PROVIDER, format!("response is missing {field}")))
}

pub fn file_type_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

pub fn build_task_payload(upload: &UploadedImage, options: ModelOptions) -> Value {
    json!({
        "type": MODEL_LABEL,
        "file": {
            "type": upload.file_type,
            "file_token": upload.token,
        },
        "texture": options.textured,
        "pbr": options.pbr,
        "auto_size": options.auto_size,
    })
}

fn task_snapshot(data: Value) -> Result<TaskSnapshot<ModelOutput>, ProviderError> {
    let task: TripoTask = serde_json::from_value(data)
        .map_err(|err| ProviderError::malformed(PROVIDER, format!("bad task payload: {err}")))?;
    let status = TaskStatus::from_str(&task.status);
    let progress = task.progress.round().clamp(0.0, 100.0) as u8;

    if status != TaskStatus::Success {
        return Ok(TaskSnapshot::without_output(status, progress));
    }

    let output = task.output.and_then(|output| {
        let preview_url = output.rendered_image;
        output
            .pbr_model
            .or(output.model)
            .or(output.base_model)
            .map(|model_url| ModelOutput {
                model_url,
                preview_url,
            })
    });

    match output {
        Some(output) => Ok(TaskSnapshot::success(output)),
        None => Err(ProviderError::malformed(
            PROVIDER,
            "task succeeded without a model URL",
        )),
    }
}

#[async_trait]
impl ModelConverter for TripoClient {
    async fn upload(&self, image: &GeneratedImage) -> Result<UploadedImage, PipelineError> {
        let file_type = file_type_for_mime(&image.mime_type);
        let part = Part::bytes(image.bytes.clone())
            .file_name(format!("portrait.{file_type}"))
            .mime_str(&image.mime_type)
            .map_err(|err| ProviderError::malformed(PROVIDER, format!("bad mime type: {err}")))?;
        let form = Form::new().part("file", part);
        let url = format!("{}/upload", self.base_url);

        log_provider_timing(PROVIDER, MODEL_LABEL, "upload_image", None, || async {
            let data = self.send(get_http_client().post(&url).multipart(form)).await?;
            let token = required_string(&data, "image_token")?;
            Ok(UploadedImage {
                token,
                file_type: file_type.to_string(),
            })
        })
        .await
    }

    async fn start_task(
        &self,
        upload: &UploadedImage,
        options: ModelOptions,
    ) -> Result<String, PipelineError> {
        let payload = build_task_payload(upload, options);
        let url = format!("{}/task", self.base_url);
        let metadata = json!({ "texture": options.textured, "pbr": options.pbr });

        log_provider_timing(PROVIDER, MODEL_LABEL, "start_task", Some(metadata), || async {
            let data = self.send(get_http_client().post(&url).json(&payload)).await?;
            Ok(required_string(&data, "task_id")?)
        })
        .await
    }

    async fn status(&self, task_id: &str) -> Result<TaskSnapshot<ModelOutput>, PipelineError> {
        let url = format!("{}/task/{}", self.base_url, task_id);
        let data = self.send(get_http_client().get(&url)).await?;
        Ok(task_snapshot(data)?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        download_artifact(url, "3d model", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_api_key() {
        let mut config = Config::load().expect("config");
        config.tripo_api_key = "tsk_secret".to_string();
        let rendered = format!("{:?}", TripoClient::from_config(&config));
        assert!(!rendered.contains("tsk_secret"), "{rendered}");
        assert!(rendered.contains("[redacted]"));
    }

    #[test]
    fn envelope_errors_become_rejections() {
        let err = unwrap_envelope(
            r#"{"code": 2010, "message": "insufficient credit", "suggestion": "top up"}"#,
        )
        .expect_err("non-zero code");
        assert_eq!(err.kind, crate::error::ProviderErrorKind::Rejected);
        assert!(err.message.contains("2010"));
        assert!(err.message.contains("top up"));

        let data = unwrap_envelope(r#"{"code": 0, "data": {"task_id": "abc"}}"#).expect("ok");
        assert_eq!(required_string(&data, "task_id").expect("task id"), "abc");
        assert!(required_string(&data, "image_token").is_err());
    }

    #[test]
    fn running_tasks_report_progress_without_output() {
        let snapshot = task_snapshot(json!({ "status": "running", "progress": 42.6 }))
            .expect("snapshot");
        assert_eq!(snapshot.status, TaskStatus::Running);
        assert_eq!(snapshot.progress, 43);
        assert!(snapshot.output.is_none());
    }

    #[test]
    fn successful_tasks_prefer_pbr_model() {
        let snapshot = task_snapshot(json!({
            "status": "success",
            "progress": 100,
            "output": {
                "model": "https://cdn/model.glb",
                "pbr_model": "https://cdn/pbr.glb",
                "rendered_image": "https://cdn/preview.webp"
            }
        }))
        .expect("snapshot");
        let output = snapshot.output.expect("output");
        assert_eq!(output.model_url, "https://cdn/pbr.glb");
        assert_eq!(output.preview_url.as_deref(), Some("https://cdn/preview.webp"));

        let missing = task_snapshot(json!({ "status": "success", "output": {} }));
        assert!(missing.is_err());
    }

    #[test]
    fn failure_statuses_pass_through() {
        let snapshot = task_snapshot(json!({ "status": "banned" })).expect("snapshot");
        assert_eq!(snapshot.status, TaskStatus::Banned);
    }

    #[test]
    fn task_payload_carries_options() {
        let upload = UploadedImage {
            token: "tok".to_string(),
            file_type: file_type_for_mime("image/jpeg").to_string(),
        };
        let payload = build_task_payload(
            &upload,
            ModelOptions {
                textured: true,
                pbr: false,
                auto_size: true,
            },
        );
        assert_eq!(payload["file"]["type"], json!("jpg"));
        assert_eq!(payload["file"]["file_token"], json!("tok"));
        assert_eq!(payload["pbr"], json!(false));
        assert_eq!(payload["type"], json!("image_to_model"));
    }
}
