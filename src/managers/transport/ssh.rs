use super::{Connection, Connector, ExecLimits, ExecOutput, LinkError};
use crate::constants::{buffers, network, remote};
use crate::errors::{ConnectError, TransferError};
use crate::model::{ConnectionSpec, Credential, ExitStatus, HostKeyPolicy, KeySource};
use crate::services::logger::Logger;
use crate::utils::paths::remote_ancestors;
use async_trait::async_trait;
use base64::Engine;
use ssh2::{ErrorCode, KeyboardInteractivePrompt, OpenFlags, OpenType, Prompt, Session, Sftp};
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Opens libssh2 sessions on the blocking pool.
pub struct SshConnector {
    logger: Logger,
    io_timeout_ms: u64,
}

impl SshConnector {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("ssh"),
            io_timeout_ms: network::TIMEOUT_IO_MS,
        }
    }

    /// Deadline for each blocking libssh2 call after authentication. A stalled
    /// peer then surfaces as a session error instead of a hung step.
    pub fn with_io_timeout_ms(mut self, io_timeout_ms: u64) -> Self {
        self.io_timeout_ms = io_timeout_ms.max(1);
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>, ConnectError> {
        let timeout_ms = spec.connect_timeout_ms;
        let owned = spec.clone();
        let started = Instant::now();
        let io_timeout_ms = self.io_timeout_ms;
        let task = tokio::task::spawn_blocking(move || connect_session(&owned, io_timeout_ms));
        let session = match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
            Err(_) => return Err(ConnectError::Timeout { timeout_ms }),
            Ok(Err(join_err)) => {
                return Err(ConnectError::NetworkUnreachable {
                    message: format!("connect task failed: {}", join_err),
                })
            }
            Ok(Ok(result)) => result?,
        };
        self.logger.debug(
            "session established",
            Some(&serde_json::json!({
                "address": spec.address(),
                "username": spec.username,
                "auth": spec.credential.method(),
                "duration_ms": started.elapsed().as_millis() as u64,
            })),
        );
        Ok(Box::new(SshConnection::new(session)))
    }
}

pub struct SshConnection {
    session: Arc<Mutex<Option<Session>>>,
}

impl SshConnection {
    fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
        }
    }

    fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&self, command: &str, limits: ExecLimits) -> Result<ExecOutput, LinkError> {
        let session = self
            .session()
            .ok_or_else(|| LinkError::Broken("session already closed".to_string()))?;
        let command = command.to_string();
        tokio::task::spawn_blocking(move || exec_blocking(&session, &command, limits))
            .await
            .map_err(|err| LinkError::Broken(format!("exec task failed: {}", err)))?
    }

    async fn create_dir_all(&self, remote_dir: &str) -> Result<(), TransferError> {
        let session = self.session().ok_or_else(closed_for_transfer)?;
        let remote_dir = remote_dir.to_string();
        tokio::task::spawn_blocking(move || {
            let sftp = session
                .sftp()
                .map_err(|err| transfer_error(&err, &remote_dir))?;
            ensure_remote_dir(&sftp, &remote_dir)
        })
        .await
        .map_err(|err| TransferError::ConnectionLost {
            message: format!("sftp task failed: {}", err),
        })?
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        chunk_size: usize,
    ) -> Result<u64, TransferError> {
        let session = self.session().ok_or_else(closed_for_transfer)?;
        let local_path = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        tokio::task::spawn_blocking(move || {
            upload_blocking(&session, &local_path, &remote_path, chunk_size)
        })
        .await
        .map_err(|err| TransferError::ConnectionLost {
            message: format!("sftp task failed: {}", err),
        })?
    }

    async fn close(&self) {
        let taken = self
            .session
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(session) = taken {
            let _ = tokio::task::spawn_blocking(move || {
                session.set_timeout(network::TIMEOUT_CLOSE_GRACE_MS as u32);
                let _ = session.disconnect(None, "provisioning finished", None);
            })
            .await;
        }
    }
}

fn closed_for_transfer() -> TransferError {
    TransferError::ConnectionLost {
        message: "session already closed".to_string(),
    }
}

fn resolve_addr(spec: &ConnectionSpec) -> Result<SocketAddr, ConnectError> {
    let address = spec.address();
    address
        .to_socket_addrs()
        .map_err(|err| ConnectError::NetworkUnreachable {
            message: format!("cannot resolve {}: {}", address, err),
        })?
        .next()
        .ok_or_else(|| ConnectError::NetworkUnreachable {
            message: format!("{} resolved to no addresses", address),
        })
}

fn session_timeout(ms: u64) -> u32 {
    ms.min(u32::MAX as u64) as u32
}

fn connect_session(spec: &ConnectionSpec, io_timeout_ms: u64) -> Result<Session, ConnectError> {
    let timeout_ms = spec.connect_timeout_ms;
    let timeout = Duration::from_millis(timeout_ms);
    let addr = resolve_addr(spec)?;
    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|err| match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            ConnectError::Timeout { timeout_ms }
        }
        _ => ConnectError::NetworkUnreachable {
            message: format!("{}: {}", spec.address(), err),
        },
    })?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = Session::new().map_err(|err| ConnectError::NetworkUnreachable {
        message: format!("failed to create SSH session: {}", err),
    })?;
    session.set_tcp_stream(tcp);
    session.set_timeout(session_timeout(timeout_ms));
    session.handshake().map_err(|err| {
        connect_failure(err, timeout_ms, |message| ConnectError::NetworkUnreachable {
            message: format!("handshake failed: {}", message),
        })
    })?;

    verify_host_key(&session, &spec.host_key)?;
    authenticate(&session, spec)?;

    session.set_timeout(session_timeout(io_timeout_ms));
    let interval = std::cmp::max(1, (spec.keepalive_interval_ms / 1000) as u32);
    session.set_keepalive(true, interval);
    Ok(session)
}

fn connect_failure(
    err: ssh2::Error,
    timeout_ms: u64,
    otherwise: fn(String) -> ConnectError,
) -> ConnectError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        std::io::ErrorKind::TimedOut => ConnectError::Timeout { timeout_ms },
        _ => otherwise(io_err.to_string()),
    }
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn normalize_fingerprint_sha256(value: &str) -> String {
    let cleaned = value.trim().trim_end_matches('=');
    if cleaned.to_lowercase().starts_with("sha256:") {
        return format!("SHA256:{}", cleaned[7..].trim());
    }
    format!("SHA256:{}", cleaned)
}

fn verify_host_key(session: &Session, policy: &HostKeyPolicy) -> Result<(), ConnectError> {
    let HostKeyPolicy::Pin(expected) = policy else {
        return Ok(());
    };
    check_host_key(expected, fingerprint_host_key_sha256(session))
}

fn check_host_key(expected: &str, observed: Option<String>) -> Result<(), ConnectError> {
    let expected = normalize_fingerprint_sha256(expected);
    if observed.as_deref() != Some(expected.as_str()) {
        return Err(ConnectError::HostKeyRejected {
            message: format!(
                "expected {}, got {}",
                expected,
                observed.unwrap_or_else(|| "unknown".to_string())
            ),
        });
    }
    Ok(())
}

/// Answers every keyboard-interactive prompt with the password; covers
/// servers that disable the plain `password` method.
struct PasswordPrompter<'a> {
    password: &'a str,
}

impl KeyboardInteractivePrompt for PasswordPrompter<'_> {
    fn prompt<'b>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[Prompt<'b>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PasswordAttempt {
    Password,
    KeyboardInteractive,
}

/// Password-based methods to try, in order, given the server's
/// comma-separated method list. An empty list means the server did not say.
fn password_attempts(methods: &str) -> Vec<PasswordAttempt> {
    let offered: Vec<&str> = methods
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .collect();
    if offered.is_empty() {
        return vec![PasswordAttempt::Password, PasswordAttempt::KeyboardInteractive];
    }
    let mut attempts = Vec::new();
    if offered.contains(&"password") {
        attempts.push(PasswordAttempt::Password);
    }
    if offered.contains(&"keyboard-interactive") {
        attempts.push(PasswordAttempt::KeyboardInteractive);
    }
    attempts
}

fn authenticate(session: &Session, spec: &ConnectionSpec) -> Result<(), ConnectError> {
    let timeout_ms = spec.connect_timeout_ms;
    let auth_failure = |message: String| ConnectError::AuthFailure { message };
    let user = spec.username.as_str();
    match &spec.credential {
        Credential::Password(password) => {
            let methods = session
                .auth_methods(user)
                .map(str::to_string)
                .unwrap_or_default();
            if session.authenticated() {
                return Ok(());
            }
            let mut last_error = None;
            for attempt in password_attempts(&methods) {
                if session.authenticated() {
                    break;
                }
                let result = match attempt {
                    PasswordAttempt::Password => session.userauth_password(user, password),
                    PasswordAttempt::KeyboardInteractive => {
                        let mut prompter = PasswordPrompter { password };
                        session.userauth_keyboard_interactive(user, &mut prompter)
                    }
                };
                if let Err(err) = result {
                    last_error = Some(connect_failure(err, timeout_ms, auth_failure));
                }
            }
            if let Some(ConnectError::Timeout { .. }) = last_error {
                return Err(ConnectError::Timeout { timeout_ms });
            }
        }
        Credential::PrivateKey { key, passphrase } => {
            let result = match key {
                KeySource::Pem(pem) => {
                    session.userauth_pubkey_memory(user, None, pem, passphrase.as_deref())
                }
                KeySource::File(path) => {
                    session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
                }
            };
            result.map_err(|err| connect_failure(err, timeout_ms, auth_failure))?;
        }
    }

    if !session.authenticated() {
        return Err(ConnectError::AuthFailure {
            message: format!(
                "server rejected {} credentials for user {}",
                spec.credential.method(),
                user
            ),
        });
    }
    Ok(())
}

struct CaptureState {
    buffer: Vec<u8>,
    max_capture: usize,
    truncated: bool,
}

impl CaptureState {
    fn new(max_capture: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_capture,
            truncated: false,
        }
    }

    fn capture(&mut self, chunk: &[u8]) {
        let remaining = self.max_capture.saturating_sub(self.buffer.len());
        if chunk.len() > remaining {
            self.buffer.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        } else {
            self.buffer.extend_from_slice(chunk);
        }
    }
}

/// Puts the session in non-blocking mode until dropped.
struct NonBlocking<'a>(&'a Session);

impl<'a> NonBlocking<'a> {
    fn enter(session: &'a Session) -> Self {
        session.set_blocking(false);
        Self(session)
    }
}

impl Drop for NonBlocking<'_> {
    fn drop(&mut self) {
        self.0.set_blocking(true);
    }
}

fn pump<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    state: &mut CaptureState,
    stream: &str,
) -> Result<bool, LinkError> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            state.capture(&buf[..n]);
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
        Err(err) => Err(LinkError::Broken(format!("{} read failed: {}", stream, err))),
    }
}

fn link_error(err: ssh2::Error) -> LinkError {
    LinkError::Broken(err.to_string())
}

/// `keepalive_send` on a non-blocking session may only report EAGAIN.
fn keepalive_result(result: Result<u32, ssh2::Error>) -> Result<(), LinkError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            let io_err: std::io::Error = err.into();
            if io_err.kind() == std::io::ErrorKind::WouldBlock {
                Ok(())
            } else {
                Err(LinkError::Broken(format!("keepalive failed: {}", io_err)))
            }
        }
    }
}

fn exec_blocking(
    session: &Session,
    command: &str,
    limits: ExecLimits,
) -> Result<ExecOutput, LinkError> {
    let mut channel = session.channel_session().map_err(link_error)?;
    channel.exec(command).map_err(link_error)?;

    let mut stdout = CaptureState::new(limits.max_capture_bytes);
    let mut stderr = CaptureState::new(limits.max_capture_bytes);
    let mut stderr_stream = channel.stderr();
    let started = Instant::now();
    let mut buf = [0u8; buffers::READ_CHUNK_SIZE];

    {
        let _nonblocking = NonBlocking::enter(session);
        loop {
            let mut progressed = pump(&mut channel, &mut buf, &mut stdout, "stdout")?;
            progressed |= pump(&mut stderr_stream, &mut buf, &mut stderr, "stderr")?;
            keepalive_result(session.keepalive_send())?;

            if channel.eof() {
                while pump(&mut channel, &mut buf, &mut stdout, "stdout")?
                    || pump(&mut stderr_stream, &mut buf, &mut stderr, "stderr")?
                {}
                break;
            }
            if let Some(timeout) = limits.timeout_ms {
                if started.elapsed() > Duration::from_millis(timeout) {
                    let _ = channel.close();
                    return Err(LinkError::TimedOut(timeout));
                }
            }
            if !progressed {
                std::thread::sleep(Duration::from_millis(network::POLL_INTERVAL_MS));
            }
        }
    }

    channel.wait_close().map_err(link_error)?;
    let signal = channel
        .exit_signal()
        .ok()
        .and_then(|sig| sig.exit_signal)
        .filter(|sig| !sig.is_empty());
    let status = match signal {
        Some(signal) => ExitStatus::Signal(signal),
        None => ExitStatus::Code(channel.exit_status().map_err(link_error)?),
    };

    Ok(ExecOutput {
        status,
        stdout: stdout.buffer,
        stderr: stderr.buffer,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
    })
}

fn transfer_error(err: &ssh2::Error, path: &str) -> TransferError {
    match err.code() {
        ErrorCode::SFTP(_) => TransferError::RemoteWriteDenied {
            path: path.to_string(),
            message: err.message().to_string(),
        },
        ErrorCode::Session(_) => TransferError::ConnectionLost {
            message: format!("{}: {}", path, err),
        },
    }
}

fn io_transfer_error(err: std::io::Error, path: &str) -> TransferError {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ssh2::Error>())
    {
        Some(inner) => transfer_error(inner, path),
        None => TransferError::ConnectionLost {
            message: format!("{}: {}", path, err),
        },
    }
}

fn ensure_remote_dir(sftp: &Sftp, remote_dir: &str) -> Result<(), TransferError> {
    for dir in remote_ancestors(remote_dir) {
        let path = Path::new(&dir);
        match sftp.stat(path) {
            Ok(stat) if stat.is_dir() => continue,
            Ok(_) => {
                return Err(TransferError::RemoteWriteDenied {
                    path: dir.clone(),
                    message: "exists and is not a directory".to_string(),
                })
            }
            Err(_) => {}
        }
        if let Err(err) = sftp.mkdir(path, remote::DIR_MODE) {
            if sftp.stat(path).map(|stat| stat.is_dir()).unwrap_or(false) {
                continue;
            }
            return Err(transfer_error(&err, &dir));
        }
    }
    Ok(())
}

fn upload_blocking(
    session: &Session,
    local_path: &Path,
    remote_path: &str,
    chunk_size: usize,
) -> Result<u64, TransferError> {
    let local_missing = |err: std::io::Error| TransferError::LocalNotFound {
        path: local_path.display().to_string(),
        message: err.to_string(),
    };
    let mut local_file = fs::File::open(local_path).map_err(local_missing)?;
    let sftp = session
        .sftp()
        .map_err(|err| transfer_error(&err, remote_path))?;
    let mut remote_file = sftp
        .open_mode(
            Path::new(remote_path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            remote::FILE_MODE,
            OpenType::File,
        )
        .map_err(|err| transfer_error(&err, remote_path))?;

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut written = 0u64;
    loop {
        let n = local_file.read(&mut buf).map_err(local_missing)?;
        if n == 0 {
            break;
        }
        remote_file
            .write_all(&buf[..n])
            .map_err(|err| io_transfer_error(err, remote_path))?;
        written += n as u64;
    }
    remote_file
        .flush()
        .map_err(|err| io_transfer_error(err, remote_path))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_state_truncates_at_limit() {
        let mut state = CaptureState::new(5);
        state.capture(b"abc");
        state.capture(b"defgh");
        assert_eq!(state.buffer, b"abcde");
        assert!(state.truncated);
    }

    #[test]
    fn fingerprints_are_normalized() {
        assert_eq!(normalize_fingerprint_sha256("sha256:abc=="), "SHA256:abc");
        assert_eq!(normalize_fingerprint_sha256(" abc "), "SHA256:abc");
    }

    #[test]
    fn pinned_host_key_mismatch_is_rejected() {
        let err = check_host_key("SHA256:expected", Some("SHA256:observed".to_string()))
            .expect_err("mismatch");
        match err {
            ConnectError::HostKeyRejected { message } => {
                assert!(message.contains("SHA256:expected"));
                assert!(message.contains("SHA256:observed"));
            }
            other => panic!("expected host key rejection, got {:?}", other),
        }
        assert!(matches!(
            check_host_key("SHA256:abc", None),
            Err(ConnectError::HostKeyRejected { .. })
        ));
    }

    #[test]
    fn pinned_host_key_match_ignores_case_and_padding() {
        assert!(check_host_key("sha256:abc=", Some("SHA256:abc".to_string())).is_ok());
    }

    #[test]
    fn password_methods_follow_server_offer() {
        use PasswordAttempt::*;
        assert_eq!(
            password_attempts("publickey,password,keyboard-interactive"),
            vec![Password, KeyboardInteractive]
        );
        assert_eq!(
            password_attempts("publickey,keyboard-interactive"),
            vec![KeyboardInteractive]
        );
        assert_eq!(password_attempts("publickey"), Vec::<PasswordAttempt>::new());
        assert_eq!(password_attempts(""), vec![Password, KeyboardInteractive]);
    }

    #[test]
    fn interactive_prompts_are_answered_with_password() {
        let mut prompter = PasswordPrompter { password: "pw-1234" };
        let prompts = [
            Prompt {
                text: "Password: ".into(),
                echo: false,
            },
            Prompt {
                text: "Verification code: ".into(),
                echo: false,
            },
        ];
        let answers = prompter.prompt("azureuser", "", &prompts);
        assert_eq!(answers, vec!["pw-1234".to_string(), "pw-1234".to_string()]);
        assert!(prompter.prompt("azureuser", "", &[]).is_empty());
    }

    #[test]
    fn sftp_status_maps_to_write_denied() {
        // LIBSSH2_FX_PERMISSION_DENIED
        let err = ssh2::Error::new(ErrorCode::SFTP(3), "permission denied");
        match transfer_error(&err, "/etc/shadow") {
            TransferError::RemoteWriteDenied { path, .. } => assert_eq!(path, "/etc/shadow"),
            other => panic!("expected write denied, got {:?}", other),
        }
        let io_err: std::io::Error = ssh2::Error::new(ErrorCode::SFTP(3), "denied").into();
        assert!(matches!(
            io_transfer_error(io_err, "/etc/shadow"),
            TransferError::RemoteWriteDenied { .. }
        ));
    }

    #[test]
    fn session_errors_map_to_connection_lost() {
        // LIBSSH2_ERROR_TIMEOUT, raised once the io deadline passes
        let err = ssh2::Error::new(ErrorCode::Session(-9), "timed out waiting on socket");
        assert!(matches!(
            transfer_error(&err, "project/a.c"),
            TransferError::ConnectionLost { .. }
        ));
        let io_err: std::io::Error =
            ssh2::Error::new(ErrorCode::Session(-9), "timed out waiting on socket").into();
        assert!(matches!(
            io_transfer_error(io_err, "project/a.c"),
            TransferError::ConnectionLost { .. }
        ));
        let plain = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset");
        assert!(matches!(
            io_transfer_error(plain, "project/a.c"),
            TransferError::ConnectionLost { .. }
        ));
    }

    #[test]
    fn keepalive_tolerates_would_block_only() {
        assert!(keepalive_result(Ok(10)).is_ok());
        // LIBSSH2_ERROR_EAGAIN
        assert!(keepalive_result(Err(ssh2::Error::new(ErrorCode::Session(-37), "would block"))).is_ok());
        // LIBSSH2_ERROR_SOCKET_SEND
        assert!(matches!(
            keepalive_result(Err(ssh2::Error::new(ErrorCode::Session(-7), "send failed"))),
            Err(LinkError::Broken(_))
        ));
    }

    #[test]
    fn io_timeout_is_bounded_and_nonzero() {
        let connector = SshConnector::new(Logger::new("test")).with_io_timeout_ms(0);
        assert_eq!(connector.io_timeout_ms, 1);
        assert_eq!(session_timeout(u64::MAX), u32::MAX);
        assert_eq!(SshConnector::new(Logger::new("test")).io_timeout_ms, network::TIMEOUT_IO_MS);
    }
}
