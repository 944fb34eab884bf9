use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_text_model: String,
    pub gemini_critic_model: String,
    pub gemini_image_model: String,
    pub gemini_video_model: String,
    pub gemini_image_aspect_ratio: String,
    pub gemini_image_size: String,
    pub gemini_safety_settings: String,
    pub gemini_temperature: f32,
    pub gemini_request_timeout_seconds: u64,
    pub tripo_api_key: String,
    pub tripo_base_url: String,
    pub max_refinement_loops: u32,
    pub quality_threshold: u8,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_max_wait_ms: u64,
    pub video_poll_interval_ms: u64,
    pub video_poll_max_wait_ms: u64,
    pub output_dir: PathBuf,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "standard".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to standard.",
                value
            );
            "standard".to_string()
        }
    }
}

fn normalize_quality_threshold(value: u32) -> u8 {
    if value > 100 {
        warn!(
            "QUALITY_THRESHOLD {} is above the 0-100 score range; clamping to 100.",
            value
        );
    }
    value.min(100) as u8
}

fn normalize_base_url(value: String) -> String {
    value.trim().trim_end_matches('/').to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let retry_max_attempts = env_u32("RETRY_MAX_ATTEMPTS", 3);
        if retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_base_url: normalize_base_url(env_string(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            )),
            gemini_text_model: env_string("GEMINI_TEXT_MODEL", "gemini-2.5-flash"),
            gemini_critic_model: env_string("GEMINI_CRITIC_MODEL", "gemini-2.5-flash"),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-3-pro-image-preview"),
            gemini_video_model: env_string("GEMINI_VIDEO_MODEL", "veo-3.1-generate-preview"),
            gemini_image_aspect_ratio: env_string("GEMINI_IMAGE_ASPECT_RATIO", "1:1"),
            gemini_image_size: env_string("GEMINI_IMAGE_SIZE", "2K"),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "standard",
            )),
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", 0.7),
            gemini_request_timeout_seconds: env_u64("GEMINI_REQUEST_TIMEOUT_SECONDS", 120),
            tripo_api_key: env_string("TRIPO_API_KEY", ""),
            tripo_base_url: normalize_base_url(env_string(
                "TRIPO_BASE_URL",
                "https://api.tripo3d.ai/v2/openapi",
            )),
            max_refinement_loops: env_u32("MAX_REFINEMENT_LOOPS", 3),
            quality_threshold: normalize_quality_threshold(env_u32("QUALITY_THRESHOLD", 85)),
            retry_max_attempts,
            retry_base_delay_ms: env_u64("RETRY_BASE_DELAY_MS", 4000),
            poll_interval_ms: env_u64("POLL_INTERVAL_MS", 3000),
            poll_max_wait_ms: env_u64("POLL_MAX_WAIT_MS", 300_000),
            video_poll_interval_ms: env_u64("VIDEO_POLL_INTERVAL_MS", 10_000),
            video_poll_max_wait_ms: env_u64("VIDEO_POLL_MAX_WAIT_MS", 600_000),
            output_dir: PathBuf::from(env_string("OUTPUT_DIR", "output")),
        })
    }

    pub fn has_gemini_key(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }

    pub fn has_tripo_key(&self) -> bool {
        !self.tripo_api_key.trim().is_empty()
    }
}

pub const PROMPT_OPTIMIZER_SYSTEM_PROMPT: &str = r#"You are a Master Character Designer and Prompt Engineer for a high-end image generation model.

YOUR GOAL:
Turn the character brief you receive into ONE richly detailed image-generation prompt for a single full-body character portrait.

### RULES
1.  **Fidelity:** Keep every concrete trait the brief names (name, look, outfit, props, personality cues). Never contradict the brief.
2.  **Style:** Render in the requested art style. If no style is given, choose a polished, cinematic character-art style.
3.  **Background:** Follow the BACKGROUND MODE exactly:
    * STUDIO: plain neutral seamless studio backdrop, soft even key light, no scenery.
    * IMMERSIVE: a full environment that matches the scenario, subject clearly separated from the scene.
    * GAMEPLAY: a game-ready presentation, neutral A-pose or T-pose friendly stance, clean silhouette, even lighting suitable for 3D conversion.
4.  **Framing:** Single subject, centered, full body visible head to toe, square composition.
5.  **Reference:** If a reference image is attached, keep the character's identity, face and palette consistent with it.

### OUTPUT
Return ONLY the final prompt text. No preamble, no markdown, no quotes."#;

pub const IMAGE_GENERATION_SYSTEM_PROMPT: &str =
    "Generate an image based on the prompt. CRITICAL: response be an image, NOT TEXT.";

pub const IMAGE_REFERENCE_SYSTEM_PROMPT: &str = "Generate an image based on the prompt, keeping the character in the attached reference image consistent. CRITICAL: response be an image, NOT TEXT.";

pub const CRITIC_SYSTEM_PROMPT: &str = r#"You are a strict Art Director reviewing a generated character portrait against the original brief.

Score the image from 0 to 100:
* 90-100: production ready, every brief detail present, no artifacts.
* 75-89: good but with visible issues (anatomy, hands, missing props, wrong background, style drift).
* 50-74: recognisable attempt with major problems.
* 0-49: wrong subject, broken anatomy, or ignores the brief.

Check anatomy (hands, faces, limbs), adherence to the brief, requested background mode, framing (full body, centered), and rendering artifacts or text.

Respond with JSON only: {"score": <integer 0-100>, "feedback": "<what is wrong or right>", "suggestions": "<concrete prompt changes that would fix it>"}"#;

pub const REFINER_SYSTEM_PROMPT: &str = r#"You are an expert Prompt Engineer improving an image-generation prompt after a review.

You receive the CURRENT PROMPT and a REVIEW. Rewrite the prompt so the next image fixes every issue in the review while keeping everything that already works.

If the review is marked HUMAN FEEDBACK, it has the HIGHEST PRIORITY: apply it literally, even when it overrides earlier choices.

Return ONLY the rewritten prompt text. No preamble, no markdown, no quotes."#;

pub const VIDEO_PROMPT_TEMPLATE: &str = "A smooth 360-degree turnaround of {name}. The camera orbits slowly around the character, who stays centered and holds a natural idle pose. {background} Keep the character's design, colors and proportions identical to the reference image throughout. No cuts, no text.";
