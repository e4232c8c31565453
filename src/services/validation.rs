use crate::constants::limits::{MAX_PORT, MIN_PORT};
use crate::errors::ProvisionError;
use crate::model::{ConnectionSpec, Credential, KeySource, ProvisioningRecipe, StepKind};

/// A recipe problem found before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeViolation {
    pub step_index: usize,
    pub message: String,
}

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(&self, value: Option<&str>, label: &str) -> Result<String, ProvisionError> {
        let normalized = value.map(str::trim).unwrap_or("");
        if normalized.is_empty() {
            return Err(ProvisionError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if normalized.contains('\0') {
            return Err(ProvisionError::invalid_params(format!(
                "{} must not contain null bytes",
                label
            )));
        }
        Ok(normalized.to_string())
    }

    pub fn ensure_port(&self, value: i64) -> Result<u16, ProvisionError> {
        if value < MIN_PORT as i64 || value > MAX_PORT as i64 {
            return Err(ProvisionError::invalid_params(format!(
                "Port must be an integer between {} and {}",
                MIN_PORT, MAX_PORT
            )));
        }
        Ok(value as u16)
    }

    /// Project names end up in remote paths and shell commands.
    pub fn ensure_project_name(&self, value: &str) -> Result<String, ProvisionError> {
        let name = self.ensure_string(Some(value), "project name")?;
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProvisionError::invalid_params(format!(
                "project name '{}' may only contain letters, digits, '-' and '_'",
                name
            )));
        }
        Ok(name)
    }

    pub fn connection_spec(&self, spec: &ConnectionSpec) -> Result<(), ProvisionError> {
        self.ensure_string(Some(&spec.host), "host")?;
        self.ensure_string(Some(&spec.username), "username")?;
        self.ensure_port(spec.port as i64)?;
        if spec.connect_timeout_ms == 0 {
            return Err(ProvisionError::invalid_params(
                "connect timeout must be greater than zero",
            ));
        }
        match &spec.credential {
            Credential::Password(password) if password.is_empty() => Err(
                ProvisionError::invalid_params("password must not be empty")
                    .with_hint("Pass the password through the environment variable named by --password-env."),
            ),
            Credential::PrivateKey {
                key: KeySource::Pem(pem),
                ..
            } if pem.trim().is_empty() => {
                Err(ProvisionError::invalid_params("private key must not be empty"))
            }
            _ => Ok(()),
        }
    }

    pub fn recipe(&self, recipe: &ProvisioningRecipe) -> Result<(), RecipeViolation> {
        if recipe.is_empty() {
            return Err(RecipeViolation {
                step_index: 0,
                message: "recipe has no steps".to_string(),
            });
        }
        for (index, step) in recipe.steps.iter().enumerate() {
            let problem = match &step.kind {
                StepKind::Connect { port: Some(0) } => Some("connect port must be 1-65535".to_string()),
                StepKind::Connect { .. } => None,
                StepKind::Transfer(spec) if spec.local_path.as_os_str().is_empty() => {
                    Some("transfer local_path is empty".to_string())
                }
                StepKind::Transfer(spec) if spec.remote_path.trim().is_empty() => {
                    Some("transfer remote_path is empty".to_string())
                }
                StepKind::Transfer(_) => None,
                StepKind::RunBatch { batch, .. } if batch.is_empty() => {
                    Some("run_batch has no commands".to_string())
                }
                StepKind::RunBatch { batch, .. } => batch
                    .iter()
                    .position(|c| c.trim().is_empty())
                    .map(|pos| format!("command {} is empty", pos + 1)),
            };
            if let Some(message) = problem {
                return Err(RecipeViolation {
                    step_index: index,
                    message,
                });
            }
        }
        Ok(())
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}
