pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const DEV_ENVIRONMENT_PORT: u16 = 8080;
    pub const TIMEOUT_CONNECT_MS: u64 = 10_000;
    pub const TIMEOUT_COMMAND_MS: u64 = 30 * 60_000;
    pub const TIMEOUT_CLOSE_GRACE_MS: u64 = 2_000;
    /// Bound on any single blocking libssh2 call once the session is up.
    pub const TIMEOUT_IO_MS: u64 = 60_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
    pub const POLL_INTERVAL_MS: u64 = 20;
}

pub mod limits {
    pub const MAX_PORT: u16 = 65_535;
    pub const MIN_PORT: u16 = 1;
    pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
    pub const LOG_LINE_LENGTH: usize = 400;
    pub const COMMAND_SUBSTRING_LENGTH: usize = 80;
}

pub mod buffers {
    pub const READ_CHUNK_SIZE: usize = 8192;
    pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;
}

pub mod retry {
    pub const MAX_ATTEMPTS: usize = 1;
    pub const BASE_DELAY_MS: u64 = 250;
    pub const MAX_DELAY_MS: u64 = 5_000;
    pub const JITTER: f64 = 0.2;
}

pub mod remote {
    pub const DIR_MODE: i32 = 0o755;
    pub const FILE_MODE: i32 = 0o644;
    pub const BOOTSTRAP_ARCHIVE: &str = ".vscode.tar.gz";
    pub const PROJECT_ROOT: &str = "project";
}
