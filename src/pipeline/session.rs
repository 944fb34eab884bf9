use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::domain::{GeneratedImage, GenerationBrief};
use crate::error::PipelineError;
use crate::pipeline::events::{SessionLog, SessionStatus};
use crate::pipeline::poller::PollSettings;
use crate::pipeline::post::{self, ModelArtifact, PostProcessReport};
use crate::pipeline::refinement::{
    run_refinement, RefinementEntry, RefinementOutcome, RefinementSettings,
};
use crate::pipeline::retry::RetryPolicy;
use crate::providers::{ModelOptions, Providers, VideoRequest};

/// Tunables for one session, resolved once so the pipeline never reads `CONFIG` directly.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub refinement: RefinementSettings,
    pub retry: RetryPolicy,
    pub model_poll: PollSettings,
    pub video_poll: PollSettings,
    pub model_options: ModelOptions,
    pub generate_video: bool,
    pub convert_model: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            refinement: RefinementSettings::default(),
            retry: RetryPolicy::default(),
            model_poll: PollSettings::default(),
            video_poll: PollSettings {
                interval: Duration::from_millis(10_000),
                max_wait: Duration::from_millis(600_000),
            },
            model_options: ModelOptions::default(),
            generate_video: true,
            convert_model: false,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refinement: RefinementSettings {
                max_loops: config.max_refinement_loops,
                quality_threshold: config.quality_threshold,
            },
            retry: RetryPolicy::new(
                config.retry_max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            model_poll: PollSettings {
                interval: Duration::from_millis(config.poll_interval_ms),
                max_wait: Duration::from_millis(config.poll_max_wait_ms),
            },
            video_poll: PollSettings {
                interval: Duration::from_millis(config.video_poll_interval_ms),
                max_wait: Duration::from_millis(config.video_poll_max_wait_ms),
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub refinement: RefinementOutcome,
    /// Present only when the result was accepted without human approval.
    pub post: Option<PostProcessReport>,
}

/// Drives one brief from input through approval and post-processing.
///
/// Methods take `&mut self`, so a session never runs two loops at once.
pub struct Session {
    providers: Providers,
    settings: PipelineSettings,
    log: SessionLog,
    brief: Option<GenerationBrief>,
    result: Option<RefinementOutcome>,
    accepted: Option<GeneratedImage>,
}

impl Session {
    #[cfg(test)]
    pub fn new(providers: Providers, settings: PipelineSettings) -> Self {
        Self::with_log(providers, settings, SessionLog::new())
    }

    pub fn with_log(providers: Providers, settings: PipelineSettings, log: SessionLog) -> Self {
        Self {
            providers,
            settings,
            log,
            brief: None,
            result: None,
            accepted: None,
        }
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn status(&self) -> SessionStatus {
        self.log.status()
    }

    pub fn result(&self) -> Option<&RefinementOutcome> {
        self.result.as_ref()
    }

    pub fn accepted_image(&self) -> Option<&GeneratedImage> {
        self.accepted.as_ref()
    }

    pub async fn start(&mut self, brief: GenerationBrief) -> Result<SessionReport, PipelineError> {
        if self.status() != SessionStatus::Input {
            return Err(PipelineError::InvalidState(format!(
                "Session is {}; reset before starting a new brief",
                self.status()
            )));
        }
        info!(name = %brief.name, background = %brief.background_mode, "starting session");
        self.brief = Some(brief.clone());
        self.run_cycle(&brief, RefinementEntry::Fresh).await
    }

    /// Re-enters the loop from the last prompt with human feedback taking priority.
    pub async fn submit_feedback(&mut self, feedback: &str) -> Result<SessionReport, PipelineError> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(PipelineError::InvalidState("Feedback text is empty".to_string()));
        }
        if !matches!(
            self.status(),
            SessionStatus::AwaitingApproval | SessionStatus::Complete
        ) {
            return Err(PipelineError::InvalidState(format!(
                "Feedback is only accepted after a result is shown (session is {})",
                self.status()
            )));
        }
        let (Some(brief), Some(previous)) = (self.brief.clone(), self.result.as_ref()) else {
            return Err(PipelineError::InvalidState(
                "No previous result to refine".to_string(),
            ));
        };

        let entry = RefinementEntry::Resume {
            prompt: previous.last_prompt.clone(),
            feedback: feedback.to_string(),
        };
        self.accepted = None;
        self.run_cycle(&brief, entry).await
    }

    /// Accepts an unsatisfied result and runs post-processing on it.
    pub async fn approve(&mut self) -> Result<PostProcessReport, PipelineError> {
        if self.status() != SessionStatus::AwaitingApproval {
            return Err(PipelineError::InvalidState(format!(
                "Nothing is awaiting approval (session is {})",
                self.status()
            )));
        }
        let image = self
            .result
            .as_ref()
            .map(|outcome| outcome.image.clone())
            .ok_or_else(|| PipelineError::InvalidState("No result to approve".to_string()))?;

        self.log.success("Image approved");
        self.accepted = Some(image.clone());
        Ok(self.post_process(&image).await)
    }

    /// On-demand 3D conversion of the accepted image.
    pub async fn convert_to_model(&mut self) -> Result<ModelArtifact, PipelineError> {
        if self.status() != SessionStatus::Complete {
            return Err(PipelineError::InvalidState(format!(
                "3D conversion needs a completed session (session is {})",
                self.status()
            )));
        }
        let image = self
            .accepted
            .clone()
            .ok_or_else(|| PipelineError::InvalidState("No accepted image".to_string()))?;
        let converter = self.providers.model.clone().ok_or_else(|| {
            PipelineError::InvalidState("No 3D provider is configured".to_string())
        })?;

        self.log.set_status(SessionStatus::ConvertingModel);
        let result = post::convert_to_model(
            converter.as_ref(),
            &image,
            self.settings.model_options,
            self.settings.model_poll,
            &self.log,
        )
        .await;
        if let Err(err) = &result {
            self.log.warning(format!("3D conversion failed: {err}"));
        }
        self.log.set_status(SessionStatus::Complete);
        result
    }

    pub fn reset(&mut self) {
        self.brief = None;
        self.result = None;
        self.accepted = None;
        self.log.reset();
    }

    async fn run_cycle(
        &mut self,
        brief: &GenerationBrief,
        entry: RefinementEntry,
    ) -> Result<SessionReport, PipelineError> {
        let outcome = match run_refinement(
            &self.providers,
            brief,
            entry,
            self.settings.refinement,
            &self.log,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.fail(err)),
        };
        self.result = Some(outcome.clone());

        if !outcome.satisfied {
            self.log.set_status(SessionStatus::AwaitingApproval);
            self.log
                .warning("Best image needs approval or feedback before continuing");
            return Ok(SessionReport {
                refinement: outcome,
                post: None,
            });
        }

        self.accepted = Some(outcome.image.clone());
        let post = self.post_process(&outcome.image).await;
        Ok(SessionReport {
            refinement: outcome,
            post: Some(post),
        })
    }

    /// Post-processing failures are reported as warnings; the accepted image stands.
    async fn post_process(&self, image: &GeneratedImage) -> PostProcessReport {
        let mut report = PostProcessReport::default();

        if let (true, Some(video), Some(brief)) = (
            self.settings.generate_video,
            self.providers.video.clone(),
            self.brief.as_ref(),
        ) {
            self.log.set_status(SessionStatus::GeneratingVideo);
            let request = VideoRequest {
                image,
                character_name: &brief.name,
                background_mode: brief.background_mode,
                scenario: &brief.scenario,
            };
            match post::generate_video(
                video.as_ref(),
                &request,
                self.settings.retry,
                self.settings.video_poll,
                &self.log,
            )
            .await
            {
                Ok(artifact) => report.video = Some(artifact),
                Err(err) => self.log.warning(format!("Video generation failed: {err}")),
            }
        }

        if let (true, Some(converter)) = (self.settings.convert_model, self.providers.model.clone())
        {
            self.log.set_status(SessionStatus::ConvertingModel);
            match post::convert_to_model(
                converter.as_ref(),
                image,
                self.settings.model_options,
                self.settings.model_poll,
                &self.log,
            )
            .await
            {
                Ok(artifact) => report.model = Some(artifact),
                Err(err) => self.log.warning(format!("3D conversion failed: {err}")),
            }
        }

        self.log.set_status(SessionStatus::Complete);
        self.log.success("Generation complete");
        report
    }

    fn fail(&self, err: PipelineError) -> PipelineError {
        self.log.error(format!("Generation failed: {err}"));
        self.log.set_status(SessionStatus::Error);
        err
    }
}
