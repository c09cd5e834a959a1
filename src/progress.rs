//! Progress reporting for long-running orchestrator stages.
//!
//! Separate from `tracing`: logging is for operators reading a file after
//! the fact, this channel is for whatever is driving the command live (CLI,
//! TUI, test harness). Modeled on the teacher's output-line channel used to
//! stream k3s container startup progress to its TUI.

use chrono::Local;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stage: String,
    pub message: String,
    pub level: Level,
    pub timestamp: chrono::DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Cheap to clone; held by every stage and every concurrent installer task.
#[derive(Clone)]
pub struct Progress {
    tx: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl Progress {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutputLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
            },
            rx,
        )
    }

    /// A progress sink that discards everything; useful for library callers and tests
    /// that only care about the return value.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn info(&self, stage: &str, message: impl Into<String>) {
        self.emit(stage, message, Level::Info);
    }

    pub fn warn(&self, stage: &str, message: impl Into<String>) {
        self.emit(stage, message, Level::Warn);
    }

    pub fn error(&self, stage: &str, message: impl Into<String>) {
        self.emit(stage, message, Level::Error);
    }

    fn emit(&self, stage: &str, message: impl Into<String>, level: Level) {
        let message = message.into();
        match level {
            Level::Info => tracing::info!(stage = %stage, "{}", message),
            Level::Warn => tracing::warn!(stage = %stage, "{}", message),
            Level::Error => tracing::error!(stage = %stage, "{}", message),
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(OutputLine {
                stage: stage.to_string(),
                message,
                level,
                timestamp: Local::now(),
            });
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::noop()
    }
}
