pub mod feature_flags;
pub mod paths;
pub mod redact;
pub mod shell;
pub mod ssh_config;
pub mod text;
