use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ordered shell commands. Later commands may depend on earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandBatch {
    commands: Vec<String>,
}

impl CommandBatch {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.commands.iter()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

impl<S: Into<String>> FromIterator<S> for CommandBatch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        CommandBatch::new(iter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Every command runs over the session's active connection.
    #[default]
    Reuse,
    /// Every command opens, uses and releases its own connection.
    PerCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    pub stop_on_first_failure: bool,
    pub connection_mode: ConnectionMode,
    pub command_timeout_ms: Option<u64>,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            stop_on_first_failure: true,
            connection_mode: ConnectionMode::Reuse,
            command_timeout_ms: None,
        }
    }
}

impl BatchPolicy {
    pub fn continue_on_failure(mut self) -> Self {
        self.stop_on_first_failure = false;
        self
    }

    pub fn per_command(mut self) -> Self {
        self.connection_mode = ConnectionMode::PerCommand;
        self
    }

    pub fn with_command_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.command_timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    SingleFile,
    DirectoryTree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSpec {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub kind: TransferKind,
}

impl TransferSpec {
    pub fn file(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            kind: TransferKind::SingleFile,
        }
    }

    pub fn tree(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            kind: TransferKind::DirectoryTree,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Connect {
        /// Overrides the session port for this and every later step.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    Transfer(TransferSpec),
    RunBatch {
        batch: CommandBatch,
        #[serde(default)]
        policy: BatchPolicy,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Connect { .. } => "connect",
            StepKind::Transfer(_) => "transfer",
            StepKind::RunBatch { .. } => "run_batch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn connect() -> Self {
        Self::from_kind(StepKind::Connect { port: None })
    }

    pub fn connect_on(port: u16) -> Self {
        Self::from_kind(StepKind::Connect { port: Some(port) })
    }

    pub fn transfer(spec: TransferSpec) -> Self {
        Self::from_kind(StepKind::Transfer(spec))
    }

    pub fn run_batch(batch: impl Into<CommandBatch>) -> Self {
        Self::from_kind(StepKind::RunBatch {
            batch: batch.into(),
            policy: BatchPolicy::default(),
        })
    }

    pub fn run_batch_with(batch: impl Into<CommandBatch>, policy: BatchPolicy) -> Self {
        Self::from_kind(StepKind::RunBatch {
            batch: batch.into(),
            policy,
        })
    }

    fn from_kind(kind: StepKind) -> Self {
        Self { label: None, kind }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Caller-supplied label, or one derived from the step kind.
    pub fn display_label(&self) -> String {
        if let Some(label) = self.label.as_ref().filter(|l| !l.trim().is_empty()) {
            return label.clone();
        }
        match &self.kind {
            StepKind::Connect { port: Some(port) } => format!("Connect on port {}", port),
            StepKind::Connect { port: None } => "Connect".to_string(),
            StepKind::Transfer(spec) => format!(
                "Upload {} to {}",
                spec.local_path.display(),
                spec.remote_path
            ),
            StepKind::RunBatch { batch, .. } => match batch.len() {
                1 => "Run 1 command".to_string(),
                n => format!("Run {} commands", n),
            },
        }
    }
}

impl From<Vec<String>> for CommandBatch {
    fn from(commands: Vec<String>) -> Self {
        CommandBatch::new(commands)
    }
}

impl From<Vec<&str>> for CommandBatch {
    fn from(commands: Vec<&str>) -> Self {
        CommandBatch::new(commands)
    }
}

impl<const N: usize> From<[&str; N]> for CommandBatch {
    fn from(commands: [&str; N]) -> Self {
        CommandBatch::new(commands)
    }
}

/// Ordered provisioning steps executed as one unit. The coordinator only
/// reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecipe {
    pub name: String,
    pub steps: Vec<Step>,
}

impl ProvisioningRecipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn extend(mut self, other: ProvisioningRecipe) -> Self {
        self.steps.extend(other.steps);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
