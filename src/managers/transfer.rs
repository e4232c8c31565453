use crate::config::Settings;
use crate::errors::TransferError;
use crate::managers::transport::Connection;
use crate::model::{TransferKind, TransferReport, TransferSpec};
use crate::services::logger::Logger;
use crate::utils::paths::{remote_join, remote_parent, to_remote_relative};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Remote directories (parents first) and `(local, remote)` file pairs.
struct TreePlan {
    directories: Vec<String>,
    files: Vec<(PathBuf, String)>,
}

/// Copies local files onto the host. Uploads overwrite, directories are
/// created on demand, nothing remote is ever deleted.
#[derive(Clone)]
pub struct TransferAgent {
    logger: Logger,
    chunk_size: usize,
}

impl TransferAgent {
    pub fn new(logger: Logger, settings: &Settings) -> Self {
        Self {
            logger: logger.child("transfer"),
            chunk_size: settings.transfer_chunk_bytes,
        }
    }

    pub async fn transfer(
        &self,
        connection: &dyn Connection,
        spec: &TransferSpec,
    ) -> Result<TransferReport, TransferError> {
        match spec.kind {
            TransferKind::SingleFile => {
                self.upload_file(connection, &spec.local_path, &spec.remote_path)
                    .await
            }
            TransferKind::DirectoryTree => {
                self.upload_tree(connection, &spec.local_path, &spec.remote_path)
                    .await
            }
        }
    }

    pub async fn upload_file(
        &self,
        connection: &dyn Connection,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<TransferReport, TransferError> {
        let owned = local_path.to_path_buf();
        let metadata = on_blocking_pool(local_path, move || std::fs::metadata(&owned))
            .await?
            .map_err(|err| local_not_found(local_path, err))?;
        if !metadata.is_file() {
            return Err(TransferError::LocalNotFound {
                path: local_path.display().to_string(),
                message: "not a regular file".to_string(),
            });
        }
        let mut report = TransferReport::default();
        if let Some(parent) = remote_parent(remote_path) {
            connection.create_dir_all(parent).await?;
        }
        report.bytes = connection
            .upload(local_path, remote_path, self.chunk_size)
            .await?;
        report.files = 1;
        self.logger.info(
            &format!("uploaded {} to {}", local_path.display(), remote_path),
            Some(&serde_json::json!({ "bytes": report.bytes })),
        );
        Ok(report)
    }

    /// Mirrors `local_dir` under `remote_dir`. Directories go first, parents
    /// before children, so every file lands in an existing directory.
    pub async fn upload_tree(
        &self,
        connection: &dyn Connection,
        local_dir: &Path,
        remote_dir: &str,
    ) -> Result<TransferReport, TransferError> {
        let root = local_dir.to_path_buf();
        let base = remote_dir.to_string();
        let plan = on_blocking_pool(local_dir, move || plan_tree(&root, &base)).await??;
        let TreePlan { directories, files } = plan;

        let mut report = TransferReport::default();
        for dir in &directories {
            connection.create_dir_all(dir).await?;
            report.directories += 1;
        }
        for (local, remote) in &files {
            report.bytes += connection.upload(local, remote, self.chunk_size).await?;
            report.files += 1;
        }
        self.logger.info(
            &format!("uploaded {} to {}", local_dir.display(), remote_dir),
            Some(&serde_json::json!({
                "files": report.files,
                "directories": report.directories,
                "bytes": report.bytes,
            })),
        );
        Ok(report)
    }
}

fn local_not_found(path: &Path, err: std::io::Error) -> TransferError {
    TransferError::LocalNotFound {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

async fn on_blocking_pool<T, F>(path: &Path, work: F) -> Result<T, TransferError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| TransferError::LocalNotFound {
            path: path.display().to_string(),
            message: format!("local scan task failed: {}", err),
        })
}

fn plan_tree(local_dir: &Path, remote_dir: &str) -> Result<TreePlan, TransferError> {
    let metadata = std::fs::metadata(local_dir).map_err(|err| local_not_found(local_dir, err))?;
    if !metadata.is_dir() {
        return Err(TransferError::LocalNotFound {
            path: local_dir.display().to_string(),
            message: "not a directory".to_string(),
        });
    }

    let mut plan = TreePlan {
        directories: Vec::new(),
        files: Vec::new(),
    };
    for entry in WalkDir::new(local_dir)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| TransferError::LocalNotFound {
            path: err
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| local_dir.display().to_string()),
            message: err.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(local_dir)
            .map(to_remote_relative)
            .unwrap_or_default();
        let remote = remote_join(remote_dir, &relative);
        if entry.file_type().is_dir() {
            plan.directories.push(remote);
        } else if entry.file_type().is_file() {
            plan.files.push((entry.into_path(), remote));
        }
    }
    Ok(plan)
}
