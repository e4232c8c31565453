use serde::Serialize;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionErrorKind {
    InvalidParams,
    NotFound,
    Denied,
    Io,
}

/// Error raised by the outer surface: argument and recipe parsing, settings,
/// local ssh config handling. Remote execution failures never use this type;
/// they are reported through `SessionOutcome`.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionError {
    pub kind: ProvisionErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ProvisionError {
    pub fn new(
        kind: ProvisionErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::Denied, "DENIED", message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ProvisionErrorKind::Io, "IO", message)
    }
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({})", self.message, hint),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for ProvisionError {}

impl From<std::io::Error> for ProvisionError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProvisionError::not_found(err.to_string()),
            std::io::ErrorKind::PermissionDenied => ProvisionError::denied(err.to_string()),
            _ => ProvisionError::io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionError::invalid_params(format!("invalid JSON: {}", err))
    }
}
