mod common;
use common::ENV_LOCK;

use provisioner::config::Settings;

const KEYS: &[&str] = &[
    "PROVISIONER_CONNECT_TIMEOUT_MS",
    "PROVISIONER_COMMAND_TIMEOUT_MS",
    "PROVISIONER_IO_TIMEOUT_MS",
    "PROVISIONER_MAX_CAPTURE_BYTES",
    "PROVISIONER_TRANSFER_CHUNK_BYTES",
    "PROVISIONER_CONNECT_ATTEMPTS",
    "PROVISIONER_RETRY_BASE_DELAY_MS",
    "PROVISIONER_LOG_COMMAND_OUTPUT",
];

fn clear_env() {
    for key in KEYS {
        std::env::remove_var(key);
    }
}

#[tokio::test]
async fn defaults_apply_without_overrides() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();

    let settings = Settings::from_env();
    assert_eq!(settings, Settings::default());
    assert!(settings.io_timeout_ms > 0, "session calls must never block without a deadline");
}

#[tokio::test]
async fn env_overrides_are_read() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    std::env::set_var("PROVISIONER_CONNECT_TIMEOUT_MS", "2500");
    std::env::set_var("PROVISIONER_MAX_CAPTURE_BYTES", "4096");
    std::env::set_var("PROVISIONER_IO_TIMEOUT_MS", "15000");
    std::env::set_var("PROVISIONER_TRANSFER_CHUNK_BYTES", "10");
    std::env::set_var("PROVISIONER_CONNECT_ATTEMPTS", "4");
    std::env::set_var("PROVISIONER_LOG_COMMAND_OUTPUT", "off");

    let settings = Settings::from_env();
    clear_env();

    assert_eq!(settings.connect_timeout_ms, 2500);
    assert_eq!(settings.max_capture_bytes, 4096);
    assert_eq!(settings.io_timeout_ms, 15_000);
    assert_eq!(settings.transfer_chunk_bytes, 1024, "chunk size is clamped");
    assert_eq!(settings.retry.max_attempts, 4);
    assert!(!settings.log_command_output);
}

#[tokio::test]
async fn invalid_numbers_fall_back_to_defaults() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    std::env::set_var("PROVISIONER_CONNECT_TIMEOUT_MS", "soon");
    std::env::set_var("PROVISIONER_CONNECT_ATTEMPTS", "0");

    let settings = Settings::from_env();
    clear_env();

    assert_eq!(settings.connect_timeout_ms, Settings::default().connect_timeout_ms);
    assert_eq!(settings.retry.max_attempts, 1);
}
