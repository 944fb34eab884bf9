use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::Local;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::domain::{BackgroundMode, GeneratedImage, GenerationBrief, ReferenceImage};
use crate::pipeline::post::{ModelArtifact, PostProcessReport};
use crate::pipeline::{GenerationEvent, RefinementOutcome, SessionLog, Severity};
use crate::providers::media::resolve_image_mime;

pub fn usage() -> &'static str {
    "Usage: character-forge --name <name> --description <text> [--style <text>] [--scenario <text>] [--background studio|immersive|gameplay] [--reference <image path>] [--no-video] [--model] [--auto-approve] [--output <dir>]"
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub name: String,
    pub description: String,
    pub style: String,
    pub scenario: String,
    pub background: BackgroundMode,
    pub reference: Option<PathBuf>,
    pub video: bool,
    pub model: bool,
    pub auto_approve: bool,
    pub output_dir: Option<PathBuf>,
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

pub fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    let mut style = String::new();
    let mut scenario = String::new();
    let mut background = BackgroundMode::Studio;
    let mut reference = None;
    let mut video = true;
    let mut model = false;
    let mut auto_approve = false;
    let mut output_dir = None;

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--name" => name = Some(take_value(args, &mut index, "--name")?.to_string()),
            "--description" => {
                description = Some(take_value(args, &mut index, "--description")?.to_string())
            }
            "--style" => style = take_value(args, &mut index, "--style")?.to_string(),
            "--scenario" => scenario = take_value(args, &mut index, "--scenario")?.to_string(),
            "--background" => {
                let value = take_value(args, &mut index, "--background")?;
                background = BackgroundMode::from_str(value)
                    .ok_or_else(|| anyhow!("Invalid --background value: {value}"))?;
            }
            "--reference" => {
                reference = Some(PathBuf::from(take_value(args, &mut index, "--reference")?))
            }
            "--output" => {
                output_dir = Some(PathBuf::from(take_value(args, &mut index, "--output")?))
            }
            "--video" => video = true,
            "--no-video" => video = false,
            "--model" => model = true,
            "--auto-approve" => auto_approve = true,
            "--help" | "-h" => return Err(anyhow!(usage())),
            other => {
                return Err(anyhow!("Unknown argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    let name = name
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("--name is required\n{}", usage()))?;
    let description = description
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("--description is required\n{}", usage()))?;

    Ok(CliArgs {
        name,
        description,
        style,
        scenario,
        background,
        reference,
        video,
        model,
        auto_approve,
        output_dir,
    })
}

pub async fn load_brief(args: &CliArgs) -> anyhow::Result<GenerationBrief> {
    let mut brief = GenerationBrief::new(args.name.trim(), args.description.trim())
        .with_style(args.style.trim())
        .with_scenario(args.scenario.trim())
        .with_background(args.background);

    if let Some(path) = &args.reference {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read reference image {}", path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("Reference image {} is empty", path.display()));
        }
        let mime_type = resolve_image_mime(&bytes, Some(path));
        brief = brief.with_reference_image(ReferenceImage { bytes, mime_type });
    }
    Ok(brief)
}

fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "·",
        Severity::Success => "✓",
        Severity::Warning => "!",
        Severity::Error => "✗",
    }
}

pub fn format_event(event: &GenerationEvent) -> String {
    format!(
        "[{}] {} {}",
        event.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        severity_marker(event.severity),
        event.message
    )
}

/// Prints events as they arrive until the session log is dropped.
pub async fn print_events(mut receiver: UnboundedReceiver<GenerationEvent>) {
    while let Some(event) = receiver.recv().await {
        println!("{}", format_event(&event));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Feedback(String),
    Restart,
    Quit,
}

pub fn parse_decision(line: &str) -> Option<Decision> {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "" => None,
        "a" | "approve" | "yes" | "y" | "d" | "done" => Some(Decision::Approve),
        "r" | "restart" => Some(Decision::Restart),
        "q" | "quit" | "exit" => Some(Decision::Quit),
        _ => Some(Decision::Feedback(trimmed.to_string())),
    }
}

pub struct Prompter {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompter {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Asks until a non-empty answer arrives. End of input counts as quit.
    pub async fn ask(&mut self, question: &str) -> anyhow::Result<Decision> {
        loop {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(question.as_bytes()).await?;
            stdout.write_all(b"\n> ").await?;
            stdout.flush().await?;

            let Some(line) = self.lines.next_line().await? else {
                return Ok(Decision::Quit);
            };
            if let Some(decision) = parse_decision(&line) {
                return Ok(decision);
            }
        }
    }
}

pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "character".to_string()
    } else {
        slug
    }
}

async fn write_file(dir: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Persists every artifact of the session under `dir` and returns the written paths.
///
/// `image` is the accepted portrait, or the best unapproved candidate when the
/// session ended at the approval gate.
pub async fn write_outputs(
    dir: &Path,
    image: &GeneratedImage,
    outcome: &RefinementOutcome,
    post: Option<&PostProcessReport>,
    model: Option<&ModelArtifact>,
    log: &SessionLog,
) -> anyhow::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let video = post.and_then(|report| report.video.as_ref());
    let model = model.or_else(|| post.and_then(|report| report.model.as_ref()));

    let mut written = Vec::new();
    let portrait_name = format!("portrait.{}", image.file_extension());
    written.push(write_file(dir, &portrait_name, &image.bytes).await?);
    written.push(write_file(dir, "prompt.txt", outcome.image_prompt.as_bytes()).await?);

    let summary = json!({
        "candidate": outcome.candidate,
        "best_score": outcome.best_score,
        "satisfied": outcome.satisfied,
        "iterations": outcome.iterations,
        "restored_best": outcome.restored_best,
        "critiques": outcome.critiques,
        "status_history": log.status_history(),
        "video_uri": video.map(|video| video.uri.as_str()),
        "model_task_id": model.map(|model| model.task_id.as_str()),
        "model_url": model.map(|model| model.model_url.as_str()),
    });
    let summary = serde_json::to_vec_pretty(&summary)?;
    written.push(write_file(dir, "critiques.json", &summary).await?);

    let mut events = Vec::new();
    for event in log.events() {
        events.extend(serde_json::to_vec(&event)?);
        events.push(b'\n');
    }
    written.push(write_file(dir, "events.jsonl", &events).await?);

    if let Some(video) = video {
        written.push(write_file(dir, "turnaround.mp4", &video.bytes).await?);
    }

    if let Some(model) = model {
        written.push(write_file(dir, "model.glb", &model.model_bytes).await?);
        if let Some(preview) = &model.preview_bytes {
            written.push(write_file(dir, "model_preview.webp", preview).await?);
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("character-forge")
            .chain(values.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_full_argument_set() {
        let parsed = parse_args(&args(&[
            "--name",
            "Nova",
            "--description",
            "hacker",
            "--background",
            "gameplay",
            "--scenario",
            "rooftop",
            "--no-video",
            "--model",
            "--output",
            "out",
        ]))
        .expect("valid args");

        assert_eq!(parsed.name, "Nova");
        assert_eq!(parsed.background, BackgroundMode::Gameplay);
        assert_eq!(parsed.scenario, "rooftop");
        assert!(!parsed.video);
        assert!(parsed.model);
        assert!(!parsed.auto_approve);
        assert_eq!(parsed.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn rejects_missing_and_unknown_arguments() {
        assert!(parse_args(&args(&["--name", "Nova"])).is_err());
        assert!(parse_args(&args(&["--name"])).is_err());
        assert!(parse_args(&args(&["--name", "Nova", "--description", "x", "--bogus"])).is_err());
        assert!(parse_args(&args(&[
            "--name",
            "Nova",
            "--description",
            "x",
            "--background",
            "space"
        ]))
        .is_err());
    }

    #[test]
    fn decisions_from_free_text() {
        assert_eq!(parse_decision("  "), None);
        assert_eq!(parse_decision("Approve"), Some(Decision::Approve));
        assert_eq!(parse_decision("q"), Some(Decision::Quit));
        assert_eq!(parse_decision("done"), Some(Decision::Approve));
        assert_eq!(parse_decision("Restart"), Some(Decision::Restart));
        assert_eq!(
            parse_decision(" make the coat longer "),
            Some(Decision::Feedback("make the coat longer".to_string()))
        );
    }

    #[tokio::test]
    async fn outputs_record_artifact_locations() {
        use crate::domain::CritiqueResult;
        use crate::pipeline::post::VideoArtifact;
        use crate::pipeline::refinement::CritiqueRecord;
        use crate::pipeline::SessionStatus;

        let image = GeneratedImage::new(vec![1, 2, 3], "image/png");
        let outcome = RefinementOutcome {
            image: image.clone(),
            candidate: 2,
            image_prompt: "portrait of Nova".to_string(),
            last_prompt: "portrait of Nova".to_string(),
            best_score: Some(91),
            satisfied: true,
            iterations: 2,
            restored_best: false,
            critiques: vec![CritiqueRecord {
                candidate: 2,
                critique: CritiqueResult::new(91, "sharp", "none"),
            }],
        };
        let post = PostProcessReport {
            video: Some(VideoArtifact {
                uri: "https://videos/clip.mp4".to_string(),
                bytes: b"mp4".to_vec(),
            }),
            model: None,
        };
        let model = ModelArtifact {
            task_id: "task-9".to_string(),
            model_url: "https://cdn/model.glb".to_string(),
            model_bytes: b"glb".to_vec(),
            preview_bytes: None,
        };
        let log = SessionLog::new();
        log.set_status(SessionStatus::OptimizingPrompt);
        log.info("started");

        let dir = std::env::temp_dir().join(format!("character-forge-{}", std::process::id()));
        let written = write_outputs(&dir, &image, &outcome, Some(&post), Some(&model), &log)
            .await
            .expect("outputs written");

        let names: Vec<_> = written
            .iter()
            .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(
            names,
            vec![
                "portrait.png",
                "prompt.txt",
                "critiques.json",
                "events.jsonl",
                "turnaround.mp4",
                "model.glb"
            ]
        );

        let summary: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.join("critiques.json")).await.expect("summary"),
        )
        .expect("valid json");
        assert_eq!(summary["video_uri"], "https://videos/clip.mp4");
        assert_eq!(summary["model_task_id"], "task-9");
        assert_eq!(summary["model_url"], "https://cdn/model.glb");
        assert_eq!(
            summary["status_history"],
            json!(["input", "optimizing_prompt"])
        );

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slugify("Nova Prime!"), "nova-prime");
        assert_eq!(slugify("  "), "character");
        assert_eq!(slugify("Dr. K--9"), "dr-k-9");
    }
}
