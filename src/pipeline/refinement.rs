use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{CritiqueResult, GeneratedImage, GenerationBrief, RefinementTrigger};
use crate::error::PipelineError;
use crate::pipeline::events::{SessionLog, SessionStatus};
use crate::providers::Providers;

pub const MAX_REFINEMENT_LOOPS: u32 = 3;
pub const QUALITY_THRESHOLD: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefinementSettings {
    pub max_loops: u32,
    pub quality_threshold: u8,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            max_loops: MAX_REFINEMENT_LOOPS,
            quality_threshold: QUALITY_THRESHOLD,
        }
    }
}

/// How a loop run establishes its first prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementEntry {
    Fresh,
    Resume { prompt: String, feedback: String },
}

/// One generated image, numbered in generation order starting at 1.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub number: u32,
    pub prompt: String,
    pub image: GeneratedImage,
}

#[derive(Debug, Clone, Serialize)]
pub struct CritiqueRecord {
    pub candidate: u32,
    #[serde(flatten)]
    pub critique: CritiqueResult,
}

/// Everything the loop owns while working on a single brief.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub current: Candidate,
    pub best: Option<Candidate>,
    pub best_score: Option<u8>,
    pub iterations: u32,
    pub satisfied: bool,
}

impl LoopState {
    pub fn new(prompt: String, image: GeneratedImage) -> Self {
        Self {
            current: Candidate {
                number: 1,
                prompt,
                image,
            },
            best: None,
            best_score: None,
            iterations: 0,
            satisfied: false,
        }
    }

    pub fn current_prompt(&self) -> &str {
        &self.current.prompt
    }

    /// Folds a critique score for the current candidate into the best-so-far
    /// tracking. Ties keep the earlier candidate.
    pub fn record_score(mut self, score: u8) -> Self {
        let improves = match self.best_score {
            Some(best) => score > best,
            None => true,
        };
        if improves {
            self.best = Some(self.current.clone());
            self.best_score = Some(score);
        }
        self
    }

    /// Replaces the current candidate after a refine+regenerate cycle.
    pub fn advance(mut self, prompt: String, image: GeneratedImage) -> Self {
        self.current = Candidate {
            number: self.current.number + 1,
            prompt,
            image,
        };
        self.iterations += 1;
        self
    }

    /// Chooses the returned image: the best critiqued candidate when the newest
    /// one is different, otherwise the newest.
    pub fn finish(self, critiques: Vec<CritiqueRecord>) -> RefinementOutcome {
        let last_prompt = self.current.prompt.clone();
        let (chosen, restored) = match self.best {
            Some(best) if best.number != self.current.number => (best, true),
            _ => (self.current, false),
        };

        RefinementOutcome {
            image: chosen.image,
            candidate: chosen.number,
            image_prompt: chosen.prompt,
            last_prompt,
            best_score: self.best_score,
            satisfied: self.satisfied,
            iterations: self.iterations,
            restored_best: restored,
            critiques,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub image: GeneratedImage,
    pub candidate: u32,
    /// Prompt that produced `image`.
    pub image_prompt: String,
    /// Newest prompt; feedback resumption continues from here.
    pub last_prompt: String,
    pub best_score: Option<u8>,
    pub satisfied: bool,
    pub iterations: u32,
    pub restored_best: bool,
    pub critiques: Vec<CritiqueRecord>,
}

/// Runs one generate, critique and refine cycle for `brief`.
///
/// Provider calls are strictly sequential and any provider error aborts the run.
pub async fn run_refinement(
    providers: &Providers,
    brief: &GenerationBrief,
    entry: RefinementEntry,
    settings: RefinementSettings,
    log: &SessionLog,
) -> Result<RefinementOutcome, PipelineError> {
    let prompt = match entry {
        RefinementEntry::Fresh => {
            log.set_status(SessionStatus::OptimizingPrompt);
            log.info(format!("Optimizing prompt for {}", brief.name.trim()));
            let prompt = providers.optimizer.optimize(brief).await?;
            log.success("Prompt optimized");
            prompt
        }
        RefinementEntry::Resume { prompt, feedback } => {
            log.set_status(SessionStatus::Refining);
            log.info("Applying human feedback to the prompt");
            providers
                .refiner
                .refine(&prompt, &RefinementTrigger::HumanFeedback(feedback))
                .await?
        }
    };
    debug!(prompt = %prompt, "initial prompt established");

    let reference = brief.reference_image.as_ref();
    log.set_status(SessionStatus::GeneratingImage);
    log.info("Generating candidate #1");
    let image = providers.generator.generate(&prompt, reference).await?;

    let mut state = LoopState::new(prompt, image);
    let mut critiques = Vec::new();

    while state.iterations < settings.max_loops && !state.satisfied {
        log.set_status(SessionStatus::Critiquing);
        log.info(format!("Critiquing candidate #{}", state.current.number));
        let critique = providers
            .critic
            .critique(&brief.description, &state.current.image)
            .await?;
        log.info(format!(
            "Candidate #{} scored {}/100: {}",
            state.current.number,
            critique.score,
            critique.feedback.trim()
        ));

        state = state.record_score(critique.score);
        critiques.push(CritiqueRecord {
            candidate: state.current.number,
            critique: critique.clone(),
        });

        if critique.score >= settings.quality_threshold {
            state.satisfied = true;
            log.success(format!(
                "Candidate #{} meets the quality threshold ({} >= {})",
                state.current.number, critique.score, settings.quality_threshold
            ));
            break;
        }

        log.set_status(SessionStatus::Refining);
        log.info(format!(
            "Refining prompt (cycle {}/{})",
            state.iterations + 1,
            settings.max_loops
        ));
        let new_prompt = providers
            .refiner
            .refine(
                state.current_prompt(),
                &RefinementTrigger::AutomaticCritique(critique),
            )
            .await?;

        log.set_status(SessionStatus::GeneratingImage);
        log.info(format!("Generating candidate #{}", state.current.number + 1));
        let image = providers.generator.generate(&new_prompt, reference).await?;
        state = state.advance(new_prompt, image);
    }

    let outcome = state.finish(critiques);
    if outcome.restored_best {
        log.info(format!(
            "Restored candidate #{} (score {}) as the best result",
            outcome.candidate,
            outcome.best_score.unwrap_or_default()
        ));
    }
    if !outcome.satisfied {
        log.warning(format!(
            "Quality threshold not reached after {} refinement cycles; best score {}",
            outcome.iterations,
            outcome
                .best_score
                .map(|score| score.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        ));
    }
    info!(
        candidate = outcome.candidate,
        satisfied = outcome.satisfied,
        iterations = outcome.iterations,
        "refinement finished"
    );
    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::ReferenceImage;
    use crate::error::ProviderError;
    use crate::providers::{ImageCritic, ImageGenerator, PromptOptimizer, PromptRefiner};

    /// Scripted stand-ins for the four loop providers. Image bytes carry the
    /// generation index so returned candidates can be identified.
    #[derive(Default)]
    pub(crate) struct ScriptedStudio {
        pub scores: Mutex<VecDeque<u8>>,
        pub generated: Mutex<Vec<String>>,
        pub refined: Mutex<Vec<RefinementTrigger>>,
        pub critiqued_briefs: Mutex<Vec<String>>,
        pub fail_critique: bool,
    }

    impl ScriptedStudio {
        pub fn with_scores(scores: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                scores: Mutex::new(scores.iter().copied().collect()),
                ..Self::default()
            })
        }

        pub fn generate_calls(&self) -> usize {
            self.generated.lock().len()
        }

        pub fn refine_calls(&self) -> usize {
            self.refined.lock().len()
        }
    }

    pub(crate) fn image_number(image: &GeneratedImage) -> u8 {
        image.bytes[0]
    }

    pub(crate) fn providers_for(studio: Arc<ScriptedStudio>) -> Providers {
        Providers::new(studio.clone(), studio.clone(), studio.clone(), studio)
    }

    #[async_trait]
    impl PromptOptimizer for ScriptedStudio {
        async fn optimize(&self, brief: &GenerationBrief) -> Result<String, PipelineError> {
            Ok(format!("portrait of {}", brief.name))
        }
    }

    #[async_trait]
    impl ImageGenerator for ScriptedStudio {
        async fn generate(
            &self,
            prompt: &str,
            _reference: Option<&ReferenceImage>,
        ) -> Result<GeneratedImage, PipelineError> {
            let mut generated = self.generated.lock();
            generated.push(prompt.to_string());
            Ok(GeneratedImage::new(vec![generated.len() as u8], "image/png"))
        }
    }

    #[async_trait]
    impl ImageCritic for ScriptedStudio {
        async fn critique(
            &self,
            original_brief: &str,
            _image: &GeneratedImage,
        ) -> Result<CritiqueResult, PipelineError> {
            if self.fail_critique {
                return Err(ProviderError::rejected("gemini", "critic unavailable").into());
            }
            self.critiqued_briefs.lock().push(original_brief.to_string());
            let score = self
                .scores
                .lock()
                .pop_front()
                .ok_or_else(|| PipelineError::InvalidState("no scripted score".into()))?;
            Ok(CritiqueResult::new(score, format!("scored {score}"), "more detail"))
        }
    }

    #[async_trait]
    impl PromptRefiner for ScriptedStudio {
        async fn refine(
            &self,
            current_prompt: &str,
            trigger: &RefinementTrigger,
        ) -> Result<String, PipelineError> {
            let mut refined = self.refined.lock();
            refined.push(trigger.clone());
            Ok(format!("{current_prompt} +r{}", refined.len()))
        }
    }

    fn nova() -> GenerationBrief {
        GenerationBrief::new("Nova", "hacker")
    }

    async fn run(studio: &Arc<ScriptedStudio>, settings: RefinementSettings) -> RefinementOutcome {
        run_refinement(
            &providers_for(studio.clone()),
            &nova(),
            RefinementEntry::Fresh,
            settings,
            &SessionLog::new(),
        )
        .await
        .expect("loop completes")
    }

    #[tokio::test]
    async fn converges_once_threshold_is_met() {
        let studio = ScriptedStudio::with_scores(&[60, 72, 90]);
        let outcome = run(&studio, RefinementSettings::default()).await;

        assert!(outcome.satisfied);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(studio.refine_calls(), 2);
        assert_eq!(studio.generate_calls(), 3);
        assert_eq!(image_number(&outcome.image), 3);
        assert_eq!(outcome.best_score, Some(90));
        assert!(!outcome.restored_best);
        assert_eq!(
            *studio.critiqued_briefs.lock(),
            vec!["hacker".to_string(); 3]
        );
    }

    #[tokio::test]
    async fn exhaustion_returns_best_critiqued_candidate() {
        let studio = ScriptedStudio::with_scores(&[40, 50, 60]);
        let outcome = run(&studio, RefinementSettings::default()).await;

        assert!(!outcome.satisfied);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(studio.refine_calls(), 3);
        assert_eq!(studio.generate_calls(), 4);
        assert_eq!(image_number(&outcome.image), 3);
        assert_eq!(outcome.best_score, Some(60));
        assert!(outcome.restored_best);
        assert_eq!(outcome.last_prompt, "portrait of Nova +r1 +r2 +r3");
        assert_eq!(outcome.image_prompt, "portrait of Nova +r1 +r2");
    }

    #[tokio::test]
    async fn satisfied_run_stops_at_high_score() {
        let studio = ScriptedStudio::with_scores(&[80, 95, 70]);
        let outcome = run(&studio, RefinementSettings::default()).await;

        assert!(outcome.satisfied);
        assert_eq!(studio.generate_calls(), 2);
        assert_eq!(image_number(&outcome.image), 2);
        assert_eq!(studio.scores.lock().len(), 1);
    }

    #[tokio::test]
    async fn worse_final_candidate_is_replaced_by_earlier_best() {
        let studio = ScriptedStudio::with_scores(&[80, 95, 70]);
        let settings = RefinementSettings {
            quality_threshold: 99,
            ..RefinementSettings::default()
        };
        let outcome = run(&studio, settings).await;

        assert!(!outcome.satisfied);
        assert_eq!(studio.generate_calls(), 4);
        assert_eq!(image_number(&outcome.image), 2);
        assert_eq!(outcome.best_score, Some(95));
        assert!(outcome.restored_best);
    }

    #[tokio::test]
    async fn ties_keep_the_earliest_candidate() {
        let studio = ScriptedStudio::with_scores(&[70, 70, 70]);
        let outcome = run(&studio, RefinementSettings::default()).await;
        assert_eq!(image_number(&outcome.image), 1);
        assert_eq!(outcome.best_score, Some(70));
    }

    #[tokio::test]
    async fn zero_scores_still_record_a_best() {
        let studio = ScriptedStudio::with_scores(&[0, 0, 0]);
        let outcome = run(&studio, RefinementSettings::default()).await;
        assert_eq!(outcome.best_score, Some(0));
        assert_eq!(image_number(&outcome.image), 1);
    }

    #[tokio::test]
    async fn zero_loops_returns_the_uncritiqued_first_image() {
        let studio = ScriptedStudio::with_scores(&[]);
        let settings = RefinementSettings {
            max_loops: 0,
            ..RefinementSettings::default()
        };
        let outcome = run(&studio, settings).await;
        assert!(!outcome.satisfied);
        assert_eq!(outcome.best_score, None);
        assert_eq!(studio.generate_calls(), 1);
        assert!(outcome.critiques.is_empty());
    }

    #[tokio::test]
    async fn critic_failure_aborts_the_run() {
        let studio = Arc::new(ScriptedStudio {
            fail_critique: true,
            ..ScriptedStudio::default()
        });
        let err = run_refinement(
            &providers_for(studio.clone()),
            &nova(),
            RefinementEntry::Fresh,
            RefinementSettings::default(),
            &SessionLog::new(),
        )
        .await
        .expect_err("critic error propagates");
        assert!(matches!(err, PipelineError::Provider(_)));
        assert_eq!(studio.generate_calls(), 1);
    }

    #[tokio::test]
    async fn resume_routes_feedback_through_refiner_and_resets_counters() {
        let studio = ScriptedStudio::with_scores(&[90]);
        let log = SessionLog::new();
        let outcome = run_refinement(
            &providers_for(studio.clone()),
            &nova(),
            RefinementEntry::Resume {
                prompt: "old prompt".to_string(),
                feedback: "make the jacket red".to_string(),
            },
            RefinementSettings::default(),
            &log,
        )
        .await
        .expect("resume completes");

        assert_eq!(
            studio.refined.lock()[0],
            RefinementTrigger::HumanFeedback("make the jacket red".to_string())
        );
        assert_eq!(studio.generated.lock()[0], "old prompt +r1");
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.satisfied);
        assert_eq!(outcome.best_score, Some(90));
    }

    #[tokio::test]
    async fn status_walks_the_critique_cycle() {
        let studio = ScriptedStudio::with_scores(&[50, 90]);
        let log = SessionLog::new();
        run_refinement(
            &providers_for(studio),
            &nova(),
            RefinementEntry::Fresh,
            RefinementSettings::default(),
            &log,
        )
        .await
        .expect("loop completes");

        use SessionStatus::*;
        assert_eq!(
            log.status_history(),
            vec![
                Input,
                OptimizingPrompt,
                GeneratingImage,
                Critiquing,
                Refining,
                GeneratingImage,
                Critiquing
            ]
        );
    }

    #[test]
    fn best_score_tracks_the_running_maximum() {
        let image = GeneratedImage::new(vec![1], "image/png");
        let mut state = LoopState::new("p".to_string(), image.clone());
        let mut observed = Vec::new();
        for (index, score) in [30u8, 80, 55, 80, 10].into_iter().enumerate() {
            if index > 0 {
                state = state.advance(format!("p{index}"), image.clone());
            }
            state = state.record_score(score);
            observed.push(state.best_score);
        }
        assert_eq!(
            observed,
            vec![Some(30), Some(80), Some(80), Some(80), Some(80)]
        );
        assert_eq!(state.best.expect("best").number, 2);
    }
}
