#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use provisioner::config::Settings;
use provisioner::errors::{ConnectError, TransferError};
use provisioner::managers::coordinator::Coordinator;
use provisioner::managers::transport::{Connection, Connector, ExecLimits, ExecOutput, LinkError};
use provisioner::model::{ConnectionSpec, Credential, ExitStatus};
use provisioner::services::logger::{LogLevel, Logger, MemorySink};
use provisioner::services::progress::CancelToken;
use provisioner::utils::paths::{remote_ancestors, remote_parent};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

pub const PASSWORD: &str = "Sup3r-s3cret!pw";

pub fn tmp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, content).expect("write file");
}

pub fn spec() -> ConnectionSpec {
    ConnectionSpec::new("10.0.0.4", "azureuser", Credential::password(PASSWORD))
}

pub fn memory_logger() -> (Logger, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let mut logger = Logger::with_sink("test", sink.clone());
    logger.set_level(LogLevel::Debug);
    (logger, sink)
}

pub fn coordinator(host: &FakeHost) -> Coordinator {
    let (logger, _sink) = memory_logger();
    Coordinator::new(Arc::new(host.clone()), logger, &Settings::default())
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Reply {
    pub fn code(code: i32) -> Self {
        Self {
            status: ExitStatus::Code(code),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn signal(signal: &str) -> Self {
        Self {
            status: ExitStatus::Signal(signal.to_string()),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }
}

#[derive(Default)]
struct HostState {
    executed: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    replies: HashMap<String, Reply>,
    connect_ports: Vec<u16>,
    connect_failures: VecDeque<ConnectError>,
    opened: usize,
    closed: usize,
    lose_connection_on: Option<String>,
    hang_on: Option<String>,
    cancel_on: Option<(String, CancelToken)>,
    denied_prefix: Option<String>,
    upload_count: usize,
}

/// In-memory stand-in for a remote machine: scripted command replies, a flat
/// file system, and a log of everything executed.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut guard = self.state.lock().expect("host state");
        f(&mut guard)
    }

    pub fn reply(&self, command: &str, reply: Reply) {
        self.with_state(|s| {
            s.replies.insert(command.to_string(), reply);
        });
    }

    pub fn fail_connects(&self, errors: Vec<ConnectError>) {
        self.with_state(|s| s.connect_failures.extend(errors));
    }

    pub fn lose_connection_on(&self, command: &str) {
        self.with_state(|s| s.lose_connection_on = Some(command.to_string()));
    }

    /// The command never exits; the exec reports a timeout if one is set.
    pub fn hang_on(&self, command: &str) {
        self.with_state(|s| s.hang_on = Some(command.to_string()));
    }

    pub fn cancel_on(&self, command: &str, token: CancelToken) {
        self.with_state(|s| s.cancel_on = Some((command.to_string(), token)));
    }

    pub fn deny_writes_under(&self, prefix: &str) {
        self.with_state(|s| s.denied_prefix = Some(prefix.to_string()));
    }

    pub fn executed(&self) -> Vec<String> {
        self.with_state(|s| s.executed.clone())
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.with_state(|s| s.files.get(path).cloned())
    }

    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.with_state(|s| s.files.clone())
    }

    pub fn dirs(&self) -> BTreeSet<String> {
        self.with_state(|s| s.dirs.clone())
    }

    pub fn connect_ports(&self) -> Vec<u16> {
        self.with_state(|s| s.connect_ports.clone())
    }

    pub fn open_connections(&self) -> usize {
        self.with_state(|s| s.opened - s.closed)
    }

    pub fn upload_count(&self) -> usize {
        self.with_state(|s| s.upload_count)
    }

    fn run(&self, command: &str) -> Result<Reply, LinkError> {
        self.with_state(|s| {
            s.executed.push(command.to_string());
            if s.lose_connection_on.as_deref() == Some(command) {
                return Err(LinkError::Broken("connection reset by peer".to_string()));
            }
            if let Some((trigger, token)) = &s.cancel_on {
                if trigger == command {
                    token.cancel();
                }
            }
            if let Some(reply) = s.replies.get(command) {
                return Ok(reply.clone());
            }
            Ok(builtin_reply(s, command))
        })
    }
}

fn builtin_reply(state: &HostState, command: &str) -> Reply {
    if let Some(text) = command.strip_prefix("echo ") {
        return Reply::code(0).stdout(&format!("{}\n", text));
    }
    if let Some(archive) = command.strip_prefix("tar -xf ") {
        if state.files.contains_key(archive.trim()) {
            return Reply::code(0);
        }
        let mut reply = Reply::code(2);
        reply.stderr = format!("tar: {}: Cannot open: No such file or directory\n", archive);
        return reply;
    }
    if command == "false" {
        return Reply::code(1);
    }
    Reply::code(0)
}

#[async_trait]
impl Connector for FakeHost {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>, ConnectError> {
        let failure = self.with_state(|s| s.connect_failures.pop_front());
        if let Some(err) = failure {
            return Err(err);
        }
        self.with_state(|s| {
            s.connect_ports.push(spec.port);
            s.opened += 1;
        });
        Ok(Box::new(FakeConnection {
            host: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct FakeConnection {
    host: FakeHost,
    closed: AtomicBool,
}

impl FakeConnection {
    fn denied(&self, path: &str) -> Option<TransferError> {
        self.host.with_state(|s| {
            s.denied_prefix
                .as_ref()
                .filter(|prefix| path.starts_with(prefix.as_str()))
                .map(|_| TransferError::RemoteWriteDenied {
                    path: path.to_string(),
                    message: "permission denied".to_string(),
                })
        })
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn exec(&self, command: &str, limits: ExecLimits) -> Result<ExecOutput, LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Broken("session already closed".to_string()));
        }
        let reply = self.host.run(command)?;
        let hangs = self
            .host
            .with_state(|s| s.hang_on.as_deref() == Some(command));
        if hangs {
            return Err(match limits.timeout_ms {
                Some(timeout_ms) => LinkError::TimedOut(timeout_ms),
                None => LinkError::Broken("command never exited".to_string()),
            });
        }
        let cap = |text: &str| {
            let bytes = text.as_bytes();
            let keep = bytes.len().min(limits.max_capture_bytes);
            (bytes[..keep].to_vec(), keep < bytes.len())
        };
        let (stdout, stdout_truncated) = cap(&reply.stdout);
        let (stderr, stderr_truncated) = cap(&reply.stderr);
        Ok(ExecOutput {
            status: reply.status,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
        })
    }

    async fn create_dir_all(&self, remote_dir: &str) -> Result<(), TransferError> {
        if let Some(err) = self.denied(remote_dir) {
            return Err(err);
        }
        self.host.with_state(|s| {
            for dir in remote_ancestors(remote_dir) {
                s.dirs.insert(dir);
            }
        });
        Ok(())
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        _chunk_size: usize,
    ) -> Result<u64, TransferError> {
        let content = std::fs::read(local_path).map_err(|err| TransferError::LocalNotFound {
            path: local_path.display().to_string(),
            message: err.to_string(),
        })?;
        if let Some(err) = self.denied(remote_path) {
            return Err(err);
        }
        self.host.with_state(|s| {
            if let Some(parent) = remote_parent(remote_path) {
                if !s.dirs.contains(parent) {
                    return Err(TransferError::RemoteWriteDenied {
                        path: remote_path.to_string(),
                        message: "no such file".to_string(),
                    });
                }
            }
            s.upload_count += 1;
            let len = content.len() as u64;
            s.files.insert(remote_path.to_string(), content);
            Ok(len)
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.host.with_state(|s| s.closed += 1);
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.host.with_state(|s| s.closed += 1);
        }
    }
}
