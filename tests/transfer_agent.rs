mod common;
use common::{memory_logger, spec, tmp_dir, write_file, FakeHost};

use provisioner::config::Settings;
use provisioner::errors::TransferError;
use provisioner::managers::transfer::TransferAgent;
use provisioner::managers::transport::Connector;

fn agent() -> TransferAgent {
    let (logger, _sink) = memory_logger();
    TransferAgent::new(logger, &Settings::default())
}

fn sample_tree(prefix: &str) -> std::path::PathBuf {
    let dir = tmp_dir(prefix);
    write_file(&dir.join("main.c"), b"int main(void) { return 0; }\n");
    write_file(&dir.join("Makefile"), b"all:\n\tcc main.c\n");
    write_file(&dir.join(".vscode/settings.json"), b"{}\n");
    write_file(&dir.join("src/lib/util.c"), b"/* util */\n");
    std::fs::create_dir_all(dir.join("empty")).expect("empty dir");
    dir
}

#[tokio::test]
async fn upload_tree_mirrors_directories_and_files() {
    let dir = sample_tree("provisioner-tree");
    let host = FakeHost::new();
    let connection = host.connect(&spec()).await.expect("connect");

    let report = agent()
        .upload_tree(connection.as_ref(), &dir, "project/demo-1.0")
        .await
        .expect("upload tree");

    assert_eq!(report.files, 4);
    assert_eq!(report.directories, 5, "root, .vscode, empty, src, src/lib");
    let dirs = host.dirs();
    assert!(dirs.contains("project"));
    assert!(dirs.contains("project/demo-1.0/empty"));
    assert!(dirs.contains("project/demo-1.0/src/lib"));
    assert_eq!(
        host.file("project/demo-1.0/src/lib/util.c").as_deref(),
        Some(&b"/* util */\n"[..])
    );
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn upload_tree_twice_is_idempotent() {
    let dir = sample_tree("provisioner-tree-twice");
    let host = FakeHost::new();
    let connection = host.connect(&spec()).await.expect("connect");
    let agent = agent();

    let first = agent
        .upload_tree(connection.as_ref(), &dir, "/home/azureuser/project")
        .await
        .expect("first upload");
    let after_first = host.files();
    let second = agent
        .upload_tree(connection.as_ref(), &dir, "/home/azureuser/project")
        .await
        .expect("second upload");

    assert_eq!(first, second);
    assert_eq!(host.files(), after_first);
    assert_eq!(host.upload_count(), 8);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn upload_file_creates_remote_parent() {
    let dir = tmp_dir("provisioner-file");
    let local = dir.join("bootstrap.tar.gz");
    write_file(&local, &[7u8; 1000]);
    let host = FakeHost::new();
    let connection = host.connect(&spec()).await.expect("connect");

    let report = agent()
        .upload_file(connection.as_ref(), &local, "/opt/tools/bootstrap.tar.gz")
        .await
        .expect("upload");

    assert_eq!(report.files, 1);
    assert_eq!(report.bytes, 1000);
    assert!(host.dirs().contains("/opt/tools"));
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn missing_local_path_is_local_not_found() {
    let host = FakeHost::new();
    let connection = host.connect(&spec()).await.expect("connect");
    let missing = std::env::temp_dir().join(format!("provisioner-missing-{}", uuid::Uuid::new_v4()));

    let file_err = agent()
        .upload_file(connection.as_ref(), &missing, "/tmp/x")
        .await
        .expect_err("missing file");
    let tree_err = agent()
        .upload_tree(connection.as_ref(), &missing, "/tmp/x")
        .await
        .expect_err("missing dir");

    assert!(matches!(file_err, TransferError::LocalNotFound { .. }));
    assert!(matches!(tree_err, TransferError::LocalNotFound { .. }));
    assert_eq!(host.upload_count(), 0);
}

#[tokio::test]
async fn tree_upload_of_a_file_is_rejected() {
    let dir = tmp_dir("provisioner-not-dir");
    let local = dir.join("single.txt");
    write_file(&local, b"x");
    let host = FakeHost::new();
    let connection = host.connect(&spec()).await.expect("connect");

    let err = agent()
        .upload_tree(connection.as_ref(), &local, "/tmp/x")
        .await
        .expect_err("not a directory");

    assert!(matches!(err, TransferError::LocalNotFound { .. }));
    let _ = std::fs::remove_dir_all(dir);
}
