//! Orchestration: the critique and refinement loop plus the retry, polling
//! and post-processing machinery around it.

pub mod events;
pub mod poller;
pub mod post;
pub mod refinement;
pub mod retry;
pub mod session;

pub use events::{GenerationEvent, SessionLog, SessionStatus, Severity};
pub use refinement::RefinementOutcome;
pub use session::{PipelineSettings, Session, SessionReport};
