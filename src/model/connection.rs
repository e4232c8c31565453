use crate::constants::network::{KEEPALIVE_INTERVAL_MS, SSH_DEFAULT_PORT, TIMEOUT_CONNECT_MS};
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    Pem(String),
    File(PathBuf),
}

/// Already-resolved credential. `Debug` never prints secret material.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey {
        key: KeySource,
        passphrase: Option<String>,
    },
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Credential::Password(password.into())
    }

    pub fn key_file(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Credential::PrivateKey {
            key: KeySource::File(path.into()),
            passphrase,
        }
    }

    pub fn key_pem(pem: impl Into<String>, passphrase: Option<String>) -> Self {
        Credential::PrivateKey {
            key: KeySource::Pem(pem.into()),
            passphrase,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey { .. } => "private_key",
        }
    }

    /// Values that must be scrubbed from anything written to a log sink.
    pub fn secrets(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            Credential::Password(password) => out.push(password.clone()),
            Credential::PrivateKey { key, passphrase } => {
                if let KeySource::Pem(pem) = key {
                    out.push(pem.clone());
                }
                if let Some(passphrase) = passphrase {
                    out.push(passphrase.clone());
                }
            }
        }
        out.retain(|s| !s.trim().is_empty());
        out
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password([REDACTED])"),
            Credential::PrivateKey { key, .. } => match key {
                KeySource::Pem(_) => f.write_str("PrivateKey(pem, [REDACTED])"),
                KeySource::File(path) => write!(f, "PrivateKey(file {})", path.display()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    #[default]
    Accept,
    /// Expected `SHA256:<base64>` fingerprint of the server host key.
    Pin(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub host_key: HostKeyPolicy,
}

impl ConnectionSpec {
    pub fn new(host: impl Into<String>, username: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: SSH_DEFAULT_PORT,
            username: username.into(),
            credential,
            connect_timeout_ms: TIMEOUT_CONNECT_MS,
            keepalive_interval_ms: KEEPALIVE_INTERVAL_MS,
            host_key: HostKeyPolicy::Accept,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_host_key(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
