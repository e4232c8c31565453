use crate::errors::FailureCause;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Code(i32),
    Signal(String),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exited with code {}", code),
            ExitStatus::Signal(signal) => write!(f, "was killed by signal {}", signal),
        }
    }
}

fn serialize_lossy<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub status: ExitStatus,
    #[serde(serialize_with = "serialize_lossy")]
    pub stdout: Vec<u8>,
    #[serde(serialize_with = "serialize_lossy")]
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransferReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// What one executed step left behind, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub label: String,
    pub kind: String,
    pub succeeded: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<CommandResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferReport>,
}

/// Terminal result of running one recipe; produced exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Success {
        recipe: String,
        steps: Vec<StepRecord>,
    },
    Failed {
        recipe: String,
        /// 0-based index of the step that failed or was never started.
        failed_step: usize,
        total_steps: usize,
        label: String,
        cause: FailureCause,
        partial_results: Vec<CommandResult>,
        steps: Vec<StepRecord>,
    },
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Success { .. })
    }

    pub fn steps(&self) -> &[StepRecord] {
        match self {
            SessionOutcome::Success { steps, .. } | SessionOutcome::Failed { steps, .. } => steps,
        }
    }

    pub fn failed_step(&self) -> Option<usize> {
        match self {
            SessionOutcome::Failed { failed_step, .. } => Some(*failed_step),
            SessionOutcome::Success { .. } => None,
        }
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            SessionOutcome::Failed { cause, .. } => Some(cause),
            SessionOutcome::Success { .. } => None,
        }
    }

    pub fn partial_results(&self) -> &[CommandResult] {
        match self {
            SessionOutcome::Failed {
                partial_results, ..
            } => partial_results,
            SessionOutcome::Success { .. } => &[],
        }
    }

    /// One line suitable for a notification or error dialog.
    pub fn summary(&self) -> String {
        match self {
            SessionOutcome::Success { recipe, steps } => {
                format!("{}: completed {} steps", recipe, steps.len())
            }
            SessionOutcome::Failed {
                recipe,
                failed_step,
                total_steps,
                label,
                cause,
                ..
            } => format!(
                "{}: failed at step {} of {} ({}): {}",
                recipe,
                failed_step + 1,
                total_steps,
                label,
                cause
            ),
        }
    }
}
