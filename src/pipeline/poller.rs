use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::domain::{TaskPhase, TaskSnapshot, TaskStatus};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            max_wait: Duration::from_millis(300_000),
        }
    }
}

/// Polls `get_status` until the task succeeds, fails, or `max_wait` elapses.
///
/// A status call still in flight at the deadline is abandoned. `on_progress` sees every observation, including the terminal one, with the
/// raw provider status. Sleeping between polls yields to the runtime, so many
/// polls can share one thread.
pub async fn poll_until_terminal<T, F, Fut, P>(
    task_id: &str,
    mut get_status: F,
    mut on_progress: P,
    settings: PollSettings,
) -> Result<T, PipelineError>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<TaskSnapshot<T>, PipelineError>>,
    P: FnMut(u8, &TaskStatus),
{
    let started = Instant::now();
    let deadline = started + settings.max_wait;

    loop {
        let snapshot = match tokio::time::timeout_at(deadline, get_status(task_id)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PipelineError::TaskTimeout {
                    task_id: task_id.to_string(),
                    waited: started.elapsed(),
                });
            }
        };
        on_progress(snapshot.progress, &snapshot.status);
        debug!(
            task_id = task_id,
            status = %snapshot.status,
            progress = snapshot.progress,
            "polled task"
        );

        match snapshot.status.phase() {
            TaskPhase::Success => {
                return snapshot.output.ok_or_else(|| {
                    PipelineError::InvalidState(format!(
                        "Task {task_id} reported success without output"
                    ))
                });
            }
            TaskPhase::Failed => {
                return Err(PipelineError::TaskFailed {
                    task_id: task_id.to_string(),
                    status: snapshot.status,
                });
            }
            TaskPhase::Pending => {}
        }

        let now = Instant::now();
        if now + settings.interval > deadline {
            return Err(PipelineError::TaskTimeout {
                task_id: task_id.to_string(),
                waited: now.duration_since(started),
            });
        }
        tokio::time::sleep(settings.interval).await;
    }
}
