use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackgroundMode {
    Studio,
    Immersive,
    Gameplay,
}

impl BackgroundMode {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "studio" => Some(BackgroundMode::Studio),
            "immersive" => Some(BackgroundMode::Immersive),
            "gameplay" => Some(BackgroundMode::Gameplay),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BackgroundMode::Studio => "STUDIO",
            BackgroundMode::Immersive => "IMMERSIVE",
            BackgroundMode::Gameplay => "GAMEPLAY",
        }
    }
}

impl fmt::Display for BackgroundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary image supplied by the user to condition generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// The immutable character brief driving one session.
#[derive(Debug, Clone)]
pub struct GenerationBrief {
    pub name: String,
    pub description: String,
    pub style: String,
    pub scenario: String,
    pub background_mode: BackgroundMode,
    pub reference_image: Option<ReferenceImage>,
}

impl GenerationBrief {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            style: String::new(),
            scenario: String::new(),
            background_mode: BackgroundMode::Studio,
            reference_image: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = scenario.into();
        self
    }

    pub fn with_background(mut self, mode: BackgroundMode) -> Self {
        self.background_mode = mode;
        self
    }

    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_image = Some(image);
        self
    }

    /// Text block handed to the prompt optimizer.
    pub fn render(&self) -> String {
        let mut text = format!(
            "CHARACTER NAME: {}\nDESCRIPTION: {}\n",
            self.name.trim(),
            self.description.trim()
        );
        if !self.style.trim().is_empty() {
            text.push_str(&format!("ART STYLE: {}\n", self.style.trim()));
        }
        if !self.scenario.trim().is_empty() {
            text.push_str(&format!("SCENARIO: {}\n", self.scenario.trim()));
        }
        text.push_str(&format!("BACKGROUND MODE: {}\n", self.background_mode));
        if self.reference_image.is_some() {
            text.push_str("REFERENCE IMAGE: attached\n");
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueResult {
    pub score: u8,
    pub feedback: String,
    pub suggestions: String,
}

impl CritiqueResult {
    pub fn new(score: u8, feedback: impl Into<String>, suggestions: impl Into<String>) -> Self {
        Self {
            score: score.min(100),
            feedback: feedback.into(),
            suggestions: suggestions.into(),
        }
    }
}

/// Why the prompt is being rewritten. Both variants go through the same refiner call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementTrigger {
    AutomaticCritique(CritiqueResult),
    HumanFeedback(String),
}

impl RefinementTrigger {
    pub fn is_human(&self) -> bool {
        matches!(self, RefinementTrigger::HumanFeedback(_))
    }
}

/// Raw status vocabulary shared by the video and 3D providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Success,
    Failed,
    Banned,
    Expired,
    Cancelled,
    Unknown(String),
}

impl TaskStatus {
    pub fn from_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "success" => TaskStatus::Success,
            "failed" => TaskStatus::Failed,
            "banned" => TaskStatus::Banned,
            "expired" => TaskStatus::Expired,
            "cancelled" => TaskStatus::Cancelled,
            other => TaskStatus::Unknown(other.to_string()),
        }
    }

    pub fn phase(&self) -> TaskPhase {
        match self {
            TaskStatus::Queued | TaskStatus::Running => TaskPhase::Pending,
            TaskStatus::Success => TaskPhase::Success,
            _ => TaskPhase::Failed,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Queued => f.write_str("queued"),
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Success => f.write_str("success"),
            TaskStatus::Failed => f.write_str("failed"),
            TaskStatus::Banned => f.write_str("banned"),
            TaskStatus::Expired => f.write_str("expired"),
            TaskStatus::Cancelled => f.write_str("cancelled"),
            TaskStatus::Unknown(raw) if raw.is_empty() => f.write_str("unknown"),
            TaskStatus::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// Coalesced poller state: queued and running are both `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Success,
    Failed,
}

/// One observation of an external long-running task.
#[derive(Debug, Clone)]
pub struct TaskSnapshot<T> {
    pub status: TaskStatus,
    pub progress: u8,
    pub output: Option<T>,
}

impl<T> TaskSnapshot<T> {
    pub fn without_output(status: TaskStatus, progress: u8) -> Self {
        Self {
            status,
            progress: progress.min(100),
            output: None,
        }
    }

    pub fn success(output: T) -> Self {
        Self {
            status: TaskStatus::Success,
            progress: 100,
            output: Some(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_coalesces_into_phases() {
        assert_eq!(TaskStatus::from_str("queued").phase(), TaskPhase::Pending);
        assert_eq!(TaskStatus::from_str("RUNNING").phase(), TaskPhase::Pending);
        assert_eq!(TaskStatus::from_str("success").phase(), TaskPhase::Success);
        for raw in ["failed", "banned", "expired", "cancelled", "unknown", "weird"] {
            assert_eq!(TaskStatus::from_str(raw).phase(), TaskPhase::Failed, "{raw}");
        }
    }

    #[test]
    fn brief_render_includes_optional_fields_only_when_present() {
        let brief = GenerationBrief::new("Nova", "hacker");
        let rendered = brief.render();
        assert!(rendered.contains("CHARACTER NAME: Nova"));
        assert!(rendered.contains("BACKGROUND MODE: STUDIO"));
        assert!(!rendered.contains("ART STYLE"));

        let styled = brief
            .with_style("cel shaded")
            .with_background(BackgroundMode::Gameplay);
        let rendered = styled.render();
        assert!(rendered.contains("ART STYLE: cel shaded"));
        assert!(rendered.contains("BACKGROUND MODE: GAMEPLAY"));
    }

    #[test]
    fn critique_score_is_capped() {
        assert_eq!(CritiqueResult::new(140, "", "").score, 100);
    }
}
