use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
}

/// Caller-visible lifecycle of one brief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Input,
    OptimizingPrompt,
    GeneratingImage,
    Critiquing,
    Refining,
    AwaitingApproval,
    GeneratingVideo,
    ConvertingModel,
    Complete,
    Error,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        if next == Error {
            return self != Error;
        }
        matches!(
            (self, next),
            (Input, OptimizingPrompt)
                | (OptimizingPrompt, GeneratingImage)
                | (GeneratingImage, Critiquing)
                | (GeneratingImage, AwaitingApproval)
                | (Critiquing, Refining)
                | (Critiquing, GeneratingVideo)
                | (Critiquing, ConvertingModel)
                | (Critiquing, Complete)
                | (Refining, GeneratingImage)
                | (AwaitingApproval, Refining)
                | (AwaitingApproval, GeneratingVideo)
                | (AwaitingApproval, ConvertingModel)
                | (AwaitingApproval, Complete)
                | (GeneratingVideo, ConvertingModel)
                | (GeneratingVideo, Complete)
                | (ConvertingModel, Complete)
                | (Complete, Refining)
                | (Complete, ConvertingModel)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Input => "input",
            SessionStatus::OptimizingPrompt => "optimizing prompt",
            SessionStatus::GeneratingImage => "generating image",
            SessionStatus::Critiquing => "critiquing",
            SessionStatus::Refining => "refining",
            SessionStatus::AwaitingApproval => "awaiting approval",
            SessionStatus::GeneratingVideo => "generating video",
            SessionStatus::ConvertingModel => "converting to 3D",
            SessionStatus::Complete => "complete",
            SessionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

struct LogInner {
    events: Vec<GenerationEvent>,
    status: SessionStatus,
    history: Vec<SessionStatus>,
    listener: Option<UnboundedSender<GenerationEvent>>,
}

impl Default for LogInner {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            status: SessionStatus::Input,
            history: vec![SessionStatus::Input],
            listener: None,
        }
    }
}

/// Append-only event stream plus the current status, shared with the presentation layer.
#[derive(Clone, Default)]
pub struct SessionLog {
    inner: Arc<Mutex<LogInner>>,
}

impl SessionLog {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events are forwarded to `listener` as they are appended.
    pub fn with_listener(listener: UnboundedSender<GenerationEvent>) -> Self {
        let log = Self::default();
        log.inner.lock().listener = Some(listener);
        log
    }

    pub fn append(&self, severity: Severity, message: impl Into<String>) {
        let event = GenerationEvent {
            timestamp: Utc::now(),
            message: message.into(),
            severity,
        };
        match severity {
            Severity::Info | Severity::Success => info!(target: "forge.session", "{}", event.message),
            Severity::Warning => warn!(target: "forge.session", "{}", event.message),
            Severity::Error => error!(target: "forge.session", "{}", event.message),
        }

        let mut inner = self.inner.lock();
        if let Some(listener) = &inner.listener {
            if listener.send(event.clone()).is_err() {
                inner.listener = None;
            }
        }
        inner.events.push(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.append(Severity::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.append(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(Severity::Error, message);
    }

    pub fn events(&self) -> Vec<GenerationEvent> {
        self.inner.lock().events.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn status_history(&self) -> Vec<SessionStatus> {
        self.inner.lock().history.clone()
    }

    /// Moves to `next`. Unexpected transitions are applied anyway and logged.
    pub fn set_status(&self, next: SessionStatus) {
        let mut inner = self.inner.lock();
        let current = inner.status;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(
                target: "forge.session",
                "Unexpected status transition {} -> {}", current, next
            );
        }
        inner.status = next;
        inner.history.push(next);
    }

    /// Clears events and returns to `Input`; the listener stays attached.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let listener = inner.listener.take();
        *inner = LogInner {
            listener,
            ..LogInner::default()
        };
    }
}
