use std::sync::Arc;

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::{error, info, warn};

mod cli;
mod config;
mod domain;
mod error;
mod pipeline;
mod providers;
mod utils;

use cli::{Decision, Prompter};
use config::CONFIG;
use pipeline::post::PostProcessReport;
use pipeline::{PipelineSettings, Session, SessionLog, SessionReport, SessionStatus};
use providers::gemini::GeminiClient;
use providers::tripo::TripoClient;
use providers::Providers;
use utils::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging(&CONFIG.log_level);

    let args: Vec<String> = std::env::args().collect();
    let cli_args = cli::parse_args(&args)?;

    if !CONFIG.has_gemini_key() {
        return Err(anyhow!("GEMINI_API_KEY is required"));
    }

    let gemini = Arc::new(GeminiClient::from_config(&CONFIG));
    let mut providers = Providers::from_gemini(gemini.clone());
    if cli_args.video {
        providers = providers.with_video(gemini);
    }
    if cli_args.model {
        if CONFIG.has_tripo_key() {
            providers = providers.with_model_converter(Arc::new(TripoClient::from_config(&CONFIG)));
        } else {
            warn!("--model requested but TRIPO_API_KEY is not set; skipping 3D conversion");
        }
    }

    let settings = PipelineSettings {
        generate_video: cli_args.video,
        convert_model: false,
        ..PipelineSettings::from_config(&CONFIG)
    };

    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(cli::print_events(receiver));
    let mut session = Session::with_log(providers, settings, SessionLog::with_listener(sender));

    let brief = cli::load_brief(&cli_args).await?;
    let output_dir = cli_args
        .output_dir
        .clone()
        .unwrap_or_else(|| CONFIG.output_dir.join(cli::slugify(&brief.name)));
    info!("Starting character forge for {}", brief.name);

    let mut post = finish_cycle(session.start(brief.clone()).await?);
    let mut prompter = Prompter::new();

    loop {
        let awaiting = session.status() == SessionStatus::AwaitingApproval;
        let decision = match session.status() {
            SessionStatus::AwaitingApproval if cli_args.auto_approve => Decision::Approve,
            SessionStatus::AwaitingApproval => {
                prompter
                    .ask("Quality threshold not reached. Type 'approve', describe changes, 'restart', or 'quit':")
                    .await?
            }
            SessionStatus::Complete if !cli_args.auto_approve => {
                prompter
                    .ask("Image accepted. Describe changes to refine again, 'restart', or 'done':")
                    .await?
            }
            _ => break,
        };
        match decision {
            Decision::Approve if awaiting => post = Some(session.approve().await?),
            Decision::Approve => break,
            Decision::Feedback(text) => post = finish_cycle(session.submit_feedback(&text).await?),
            Decision::Restart => {
                session.reset();
                post = finish_cycle(session.start(brief.clone()).await?);
            }
            Decision::Quit => {
                if awaiting {
                    info!("Session ended without approval");
                }
                break;
            }
        }
    }

    let model = if cli_args.model
        && session.status() == SessionStatus::Complete
        && CONFIG.has_tripo_key()
    {
        match session.convert_to_model().await {
            Ok(model) => Some(model),
            Err(err) => {
                error!("3D conversion failed: {err}");
                None
            }
        }
    } else {
        None
    };

    let outcome = session
        .result()
        .ok_or_else(|| anyhow!("Session produced no result"))?;
    let image = session.accepted_image().unwrap_or(&outcome.image);
    let written = cli::write_outputs(
        &output_dir,
        image,
        outcome,
        post.as_ref(),
        model.as_ref(),
        session.log(),
    )
    .await?;
    for path in &written {
        println!("wrote {}", path.display());
    }

    // Dropping the session closes the event channel so the printer drains and exits.
    drop(session);
    let _ = printer.await;
    Ok(())
}

/// Logs the cycle's result and hands back its post-processing report, if any ran.
fn finish_cycle(report: SessionReport) -> Option<PostProcessReport> {
    let outcome = &report.refinement;
    info!(
        candidate = outcome.candidate,
        best_score = ?outcome.best_score,
        satisfied = outcome.satisfied,
        "cycle finished"
    );
    report.post
}
