use tracing::info;

use crate::domain::{GeneratedImage, TaskStatus};
use crate::error::PipelineError;
use crate::pipeline::events::SessionLog;
use crate::pipeline::poller::{poll_until_terminal, PollSettings};
use crate::pipeline::retry::{with_pipeline_retry, RetryPolicy};
use crate::providers::{ModelConverter, ModelOptions, VideoGenerator, VideoRequest};

#[derive(Debug, Clone)]
pub struct VideoArtifact {
    pub uri: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub task_id: String,
    pub model_url: String,
    pub model_bytes: Vec<u8>,
    pub preview_bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessReport {
    pub video: Option<VideoArtifact>,
    pub model: Option<ModelArtifact>,
}

/// Emits a progress event only when the observed status or percentage changes.
fn progress_reporter<'a>(log: &'a SessionLog, label: &'a str) -> impl FnMut(u8, &TaskStatus) + 'a {
    let mut last: Option<(u8, TaskStatus)> = None;
    move |progress, status| {
        let observed = (progress, status.clone());
        if last.as_ref() == Some(&observed) {
            return;
        }
        log.info(format!("{label}: {status} ({progress}%)"));
        last = Some(observed);
    }
}

/// Starts the turnaround clip (with retry), waits for it and fetches the bytes
/// right away since the provider's URI expires.
pub async fn generate_video(
    video: &dyn VideoGenerator,
    request: &VideoRequest<'_>,
    retry: RetryPolicy,
    poll: PollSettings,
    log: &SessionLog,
) -> Result<VideoArtifact, PipelineError> {
    log.info(format!("Starting 360° video for {}", request.character_name));
    let operation = with_pipeline_retry("video generation", retry, || video.start(request)).await?;
    info!(operation = %operation, "video generation started");

    let uri = poll_until_terminal(
        &operation,
        |_| video.status(&operation),
        progress_reporter(log, "Video"),
        poll,
    )
    .await?;

    let bytes = video.download(&uri).await?;
    log.success(format!("Video ready ({} bytes)", bytes.len()));
    Ok(VideoArtifact { uri, bytes })
}

/// Uploads the accepted image, runs the image-to-model task and downloads the
/// mesh plus its rendered preview.
pub async fn convert_to_model(
    converter: &dyn ModelConverter,
    image: &GeneratedImage,
    options: ModelOptions,
    poll: PollSettings,
    log: &SessionLog,
) -> Result<ModelArtifact, PipelineError> {
    log.info("Uploading image for 3D conversion");
    let upload = converter.upload(image).await?;
    let task_id = converter.start_task(&upload, options).await?;
    log.info(format!("3D task {task_id} started"));

    let output = poll_until_terminal(
        &task_id,
        |_| converter.status(&task_id),
        progress_reporter(log, "3D model"),
        poll,
    )
    .await?;

    let model_bytes = converter.download(&output.model_url).await?;
    let preview_bytes = match output.preview_url.as_deref() {
        Some(url) => match converter.download(url).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                log.warning(format!("3D preview download failed: {err}"));
                None
            }
        },
        None => None,
    };

    log.success(format!("3D model ready ({} bytes)", model_bytes.len()));
    Ok(ModelArtifact {
        task_id,
        model_url: output.model_url,
        model_bytes,
        preview_bytes,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::{BackgroundMode, TaskSnapshot};
    use crate::error::ProviderError;
    use crate::providers::{ModelOutput, UploadedImage};

    #[derive(Default)]
    pub(crate) struct FakeVideo {
        pub start_failures: AtomicU32,
        pub start_calls: AtomicU32,
        pub statuses: Mutex<VecDeque<TaskSnapshot<String>>>,
        pub fail_download: bool,
    }

    impl FakeVideo {
        pub fn finishing_after(running_polls: usize) -> Arc<Self> {
            let mut statuses: VecDeque<_> = (0..running_polls)
                .map(|_| TaskSnapshot::without_output(TaskStatus::Running, 0))
                .collect();
            statuses.push_back(TaskSnapshot::success("https://videos/clip.mp4".to_string()));
            Arc::new(Self {
                statuses: Mutex::new(statuses),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl VideoGenerator for FakeVideo {
        async fn start(&self, _request: &VideoRequest<'_>) -> Result<String, PipelineError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.start_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.start_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ProviderError::malformed("gemini", "Internal server error").into());
            }
            Ok("operations/clip-1".to_string())
        }

        async fn status(&self, _operation: &str) -> Result<TaskSnapshot<String>, PipelineError> {
            self.statuses
                .lock()
                .pop_front()
                .ok_or_else(|| PipelineError::InvalidState("no scripted status".into()))
        }

        async fn download(&self, _uri: &str) -> Result<Vec<u8>, PipelineError> {
            if self.fail_download {
                return Err(PipelineError::Download("expired link".into()));
            }
            Ok(b"mp4".to_vec())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeConverter {
        pub statuses: Mutex<VecDeque<TaskSnapshot<ModelOutput>>>,
        pub downloads: Mutex<Vec<String>>,
    }

    impl FakeConverter {
        pub fn with_statuses(statuses: Vec<TaskSnapshot<ModelOutput>>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.into()),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl ModelConverter for FakeConverter {
        async fn upload(&self, _image: &GeneratedImage) -> Result<UploadedImage, PipelineError> {
            Ok(UploadedImage {
                token: "tok".to_string(),
                file_type: "png".to_string(),
            })
        }

        async fn start_task(
            &self,
            _upload: &UploadedImage,
            _options: ModelOptions,
        ) -> Result<String, PipelineError> {
            Ok("task-9".to_string())
        }

        async fn status(&self, _task_id: &str) -> Result<TaskSnapshot<ModelOutput>, PipelineError> {
            self.statuses
                .lock()
                .pop_front()
                .ok_or_else(|| PipelineError::InvalidState("no scripted status".into()))
        }

        async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
            self.downloads.lock().push(url.to_string());
            if url.contains("preview") {
                return Err(PipelineError::Download("preview expired".into()));
            }
            Ok(b"glb".to_vec())
        }
    }

    fn portrait() -> GeneratedImage {
        GeneratedImage::new(vec![1, 2, 3], "image/png")
    }

    #[tokio::test(start_paused = true)]
    async fn video_start_is_retried_then_polled_and_downloaded() {
        let video = FakeVideo::finishing_after(2);
        video.start_failures.store(2, Ordering::SeqCst);
        let image = portrait();
        let request = VideoRequest {
            image: &image,
            character_name: "Nova",
            background_mode: BackgroundMode::Studio,
            scenario: "",
        };
        let log = SessionLog::new();

        let artifact = generate_video(
            video.as_ref(),
            &request,
            RetryPolicy::default(),
            PollSettings::default(),
            &log,
        )
        .await
        .expect("video completes");

        assert_eq!(video.start_calls.load(Ordering::SeqCst), 3);
        assert_eq!(artifact.uri, "https://videos/clip.mp4");
        assert_eq!(artifact.bytes, b"mp4".to_vec());
        let progress_events = log
            .events()
            .into_iter()
            .filter(|event| event.message.starts_with("Video:"))
            .count();
        assert_eq!(progress_events, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_video_download_is_an_error() {
        let video = Arc::new(FakeVideo {
            fail_download: true,
            statuses: Mutex::new(
                vec![TaskSnapshot::success("https://videos/x.mp4".to_string())].into(),
            ),
            ..FakeVideo::default()
        });
        let image = portrait();
        let request = VideoRequest {
            image: &image,
            character_name: "Nova",
            background_mode: BackgroundMode::Gameplay,
            scenario: "rooftop chase",
        };
        let err = generate_video(
            video.as_ref(),
            &request,
            RetryPolicy::default(),
            PollSettings::default(),
            &SessionLog::new(),
        )
        .await
        .expect_err("download fails");
        assert!(matches!(err, PipelineError::Download(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn model_conversion_tolerates_missing_preview() {
        let converter = FakeConverter::with_statuses(vec![
            TaskSnapshot::without_output(TaskStatus::Queued, 0),
            TaskSnapshot::without_output(TaskStatus::Running, 60),
            TaskSnapshot::success(ModelOutput {
                model_url: "https://cdn/model.glb".to_string(),
                preview_url: Some("https://cdn/preview.webp".to_string()),
            }),
        ]);
        let log = SessionLog::new();
        let artifact = convert_to_model(
            converter.as_ref(),
            &portrait(),
            ModelOptions::default(),
            PollSettings::default(),
            &log,
        )
        .await
        .expect("conversion completes");

        assert_eq!(artifact.task_id, "task-9");
        assert_eq!(artifact.model_bytes, b"glb".to_vec());
        assert!(artifact.preview_bytes.is_none());
        assert_eq!(converter.downloads.lock().len(), 2);
        assert!(log
            .events()
            .iter()
            .any(|event| event.message.contains("preview download failed")));
    }

    #[tokio::test(start_paused = true)]
    async fn banned_model_task_fails() {
        let converter = FakeConverter::with_statuses(vec![TaskSnapshot::without_output(
            TaskStatus::Banned,
            0,
        )]);
        let err = convert_to_model(
            converter.as_ref(),
            &portrait(),
            ModelOptions::default(),
            PollSettings::default(),
            &SessionLog::new(),
        )
        .await
        .expect_err("banned task");
        assert!(matches!(
            err,
            PipelineError::TaskFailed {
                status: TaskStatus::Banned,
                ..
            }
        ));
        assert!(converter.downloads.lock().is_empty());
    }
}
