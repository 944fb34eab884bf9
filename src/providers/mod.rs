//! Adapter seams between the pipeline and the external generative services.
//!
//! Every adapter is a stateless translator: domain types in, domain types out,
//! a [`PipelineError`] on anything unusable. None of them retry; that belongs
//! to [`crate::pipeline::retry`].

pub mod gemini;
pub mod media;
pub mod tripo;

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    BackgroundMode, CritiqueResult, GeneratedImage, GenerationBrief, ReferenceImage,
    RefinementTrigger, TaskSnapshot,
};
use crate::error::PipelineError;

#[async_trait]
pub trait PromptOptimizer: Send + Sync {
    async fn optimize(&self, brief: &GenerationBrief) -> Result<String, PipelineError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<GeneratedImage, PipelineError>;
}

#[async_trait]
pub trait ImageCritic: Send + Sync {
    async fn critique(
        &self,
        original_brief: &str,
        image: &GeneratedImage,
    ) -> Result<CritiqueResult, PipelineError>;
}

#[async_trait]
pub trait PromptRefiner: Send + Sync {
    /// Returns `current_prompt` unchanged when the provider produces no text.
    async fn refine(
        &self,
        current_prompt: &str,
        trigger: &RefinementTrigger,
    ) -> Result<String, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct VideoRequest<'a> {
    pub image: &'a GeneratedImage,
    pub character_name: &'a str,
    pub background_mode: BackgroundMode,
    pub scenario: &'a str,
}

/// Image to turnaround clip. The task output is the provider's video URI.
#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn start(&self, request: &VideoRequest<'_>) -> Result<String, PipelineError>;

    async fn status(&self, operation: &str) -> Result<TaskSnapshot<String>, PipelineError>;

    async fn download(&self, uri: &str) -> Result<Vec<u8>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOptions {
    pub textured: bool,
    pub pbr: bool,
    pub auto_size: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            textured: true,
            pbr: true,
            auto_size: true,
        }
    }
}

/// Opaque handle returned by the 3D provider's upload step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub token: String,
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOutput {
    pub model_url: String,
    pub preview_url: Option<String>,
}

#[async_trait]
pub trait ModelConverter: Send + Sync {
    async fn upload(&self, image: &GeneratedImage) -> Result<UploadedImage, PipelineError>;

    async fn start_task(
        &self,
        upload: &UploadedImage,
        options: ModelOptions,
    ) -> Result<String, PipelineError>;

    async fn status(&self, task_id: &str) -> Result<TaskSnapshot<ModelOutput>, PipelineError>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Adapter instances for one host. Cheap to clone and safe to share across briefs.
#[derive(Clone)]
pub struct Providers {
    pub optimizer: Arc<dyn PromptOptimizer>,
    pub generator: Arc<dyn ImageGenerator>,
    pub critic: Arc<dyn ImageCritic>,
    pub refiner: Arc<dyn PromptRefiner>,
    pub video: Option<Arc<dyn VideoGenerator>>,
    pub model: Option<Arc<dyn ModelConverter>>,
}

impl Providers {
    pub fn new(
        optimizer: Arc<dyn PromptOptimizer>,
        generator: Arc<dyn ImageGenerator>,
        critic: Arc<dyn ImageCritic>,
        refiner: Arc<dyn PromptRefiner>,
    ) -> Self {
        Self {
            optimizer,
            generator,
            critic,
            refiner,
            video: None,
            model: None,
        }
    }

    /// One Gemini client serves prompt, image, critique and refine.
    pub fn from_gemini(client: Arc<gemini::GeminiClient>) -> Self {
        Self::new(client.clone(), client.clone(), client.clone(), client)
    }

    pub fn with_video(mut self, video: Arc<dyn VideoGenerator>) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_model_converter(mut self, model: Arc<dyn ModelConverter>) -> Self {
        self.model = Some(model);
        self
    }
}
