use crate::errors::ProvisionError;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostEntry {
    pub patterns: Vec<String>,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
}

impl HostEntry {
    pub fn alias(&self) -> Option<&str> {
        self.patterns
            .iter()
            .map(String::as_str)
            .find(|p| !p.contains('*') && !p.contains('?') && !p.starts_with('!'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "alias", rename_all = "snake_case")]
pub enum HostLookup {
    Existing(String),
    Added(String),
}

impl HostLookup {
    pub fn alias(&self) -> &str {
        match self {
            HostLookup::Existing(alias) | HostLookup::Added(alias) => alias,
        }
    }
}

fn split_directive(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, rest) = match trimmed.find(|c: char| c.is_whitespace() || c == '=') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
        None => (trimmed, ""),
    };
    let value = rest
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=')
        .trim()
        .trim_matches('"');
    Some((key.to_lowercase(), value.to_string()))
}

/// Parses the `Host` blocks of an OpenSSH client config. `Match` blocks and
/// global directives are skipped.
pub fn parse_hosts(text: &str) -> Vec<HostEntry> {
    let mut out = Vec::new();
    let mut current: Option<HostEntry> = None;
    for line in text.lines() {
        let Some((key, value)) = split_directive(line) else {
            continue;
        };
        match key.as_str() {
            "host" => {
                if let Some(entry) = current.take() {
                    out.push(entry);
                }
                current = Some(HostEntry {
                    patterns: value.split_whitespace().map(str::to_string).collect(),
                    ..HostEntry::default()
                });
            }
            "match" => {
                if let Some(entry) = current.take() {
                    out.push(entry);
                }
            }
            "hostname" => {
                if let Some(entry) = current.as_mut() {
                    entry.hostname = Some(value);
                }
            }
            "user" => {
                if let Some(entry) = current.as_mut() {
                    entry.user = Some(value);
                }
            }
            "port" => {
                if let Some(entry) = current.as_mut() {
                    entry.port = value.parse().ok();
                }
            }
            _ => {}
        }
    }
    if let Some(entry) = current {
        out.push(entry);
    }
    out
}

pub fn find_alias_for_hostname(text: &str, hostname: &str) -> Option<String> {
    parse_hosts(text)
        .into_iter()
        .find(|entry| entry.hostname.as_deref() == Some(hostname))
        .and_then(|entry| entry.alias().map(str::to_string))
}

pub fn render_host_block(alias: &str, hostname: &str, user: &str, port: u16) -> String {
    format!(
        "Host {}\n  HostName {}\n  User {}\n  Port {}\n",
        alias, hostname, user, port
    )
}

pub fn default_config_path() -> PathBuf {
    crate::utils::paths::expand_home_path("~/.ssh/config")
}

fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let tmp = path.with_extension(format!("{}.tmp", token));
    {
        let mut file = fs::File::create(&tmp)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// Returns the alias already pointing at `hostname`, or appends a new `Host`
/// block so a remote-SSH workspace can open the machine by name.
pub fn ensure_host_entry(
    path: &Path,
    alias: &str,
    hostname: &str,
    user: &str,
    port: u16,
) -> Result<HostLookup, ProvisionError> {
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };
    if let Some(found) = find_alias_for_hostname(&existing, hostname) {
        return Ok(HostLookup::Existing(found));
    }
    if parse_hosts(&existing)
        .iter()
        .any(|entry| entry.patterns.iter().any(|p| p == alias))
    {
        return Err(ProvisionError::invalid_params(format!(
            "ssh config already defines Host {} for a different HostName",
            alias
        ))
        .with_hint("Pick another --alias."));
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    if !content.is_empty() {
        content.push('\n');
    }
    content.push_str(&render_host_block(alias, hostname, user, port));
    write_atomically(path, &content)?;
    Ok(HostLookup::Added(alias.to_string()))
}
