use std::path::{Component, Path, PathBuf};

pub fn expand_home_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Some(str_path) = path.to_str() {
        if let Some(rest) = str_path.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        if str_path == "~" {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home);
            }
        }
    }
    path.to_path_buf()
}

// Remote paths are POSIX regardless of the local platform, so they are
// handled as strings rather than `Path`.

pub fn remote_join(dir: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if dir.is_empty() || dir == "." {
        return relative.to_string();
    }
    if relative.is_empty() {
        return dir.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), relative)
}

/// Parent directory of a remote path, `None` for bare names and the root.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some(&trimmed[..idx])
}

/// Every prefix of `dir`, shortest first: `a/b/c` -> `a`, `a/b`, `a/b/c`.
pub fn remote_ancestors(dir: &str) -> Vec<String> {
    let absolute = dir.starts_with('/');
    let mut current = String::new();
    let mut out = Vec::new();
    for part in dir.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if !current.is_empty() || absolute {
            current.push('/');
        }
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

/// Renders a local relative path with `/` separators for use on the remote side.
pub fn to_remote_relative(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
