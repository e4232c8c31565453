mod common;
use common::{memory_logger, spec, FakeHost, Reply};

use provisioner::config::Settings;
use provisioner::errors::ExecutionError;
use provisioner::managers::runner::{BatchRunner, Link};
use provisioner::managers::transport::Connector;
use provisioner::model::{BatchPolicy, CommandBatch, ExitStatus};

fn runner() -> BatchRunner {
    let (logger, _sink) = memory_logger();
    BatchRunner::new(logger, &Settings::default())
}

#[tokio::test]
async fn stops_at_first_rejected_command() {
    let host = FakeHost::new();
    host.reply("B", Reply::code(3));
    let connection = host.connect(&spec()).await.expect("connect");

    let failure = runner()
        .run(
            Link::Shared(connection.as_ref()),
            &CommandBatch::new(["A", "B", "C"]),
            &BatchPolicy::default(),
        )
        .await
        .expect_err("batch should fail");

    assert_eq!(failure.results.len(), 2);
    assert_eq!(failure.results[0].command, "A");
    assert_eq!(failure.results[1].command, "B");
    assert_eq!(failure.results[1].status, ExitStatus::Code(3));
    assert_eq!(host.executed(), vec!["A", "B"], "C must never start");
    match &failure.cause {
        ExecutionError::CommandRejected {
            command_index,
            total,
            command,
            ..
        } => {
            assert_eq!(*command_index, 1);
            assert_eq!(*total, 3);
            assert_eq!(command, "B");
        }
        other => panic!("unexpected cause {:?}", other),
    }
    assert_eq!(
        failure.cause.to_string(),
        "command 2 of 3 `B` exited with code 3"
    );
}

#[tokio::test]
async fn continue_on_failure_runs_everything_and_reports_first_rejection() {
    let host = FakeHost::new();
    host.reply("B", Reply::code(1));
    host.reply("C", Reply::signal("KILL"));
    let connection = host.connect(&spec()).await.expect("connect");

    let failure = runner()
        .run(
            Link::Shared(connection.as_ref()),
            &CommandBatch::new(["A", "B", "C", "D"]),
            &BatchPolicy::default().continue_on_failure(),
        )
        .await
        .expect_err("batch should fail");

    assert_eq!(host.executed(), vec!["A", "B", "C", "D"]);
    assert_eq!(failure.results.len(), 4);
    assert_eq!(failure.cause.command_index(), 1);
    assert_eq!(
        failure.results[2].status,
        ExitStatus::Signal("KILL".to_string())
    );
}

#[tokio::test]
async fn successful_batch_keeps_order_and_output() {
    let host = FakeHost::new();
    let connection = host.connect(&spec()).await.expect("connect");

    let results = runner()
        .run(
            Link::Shared(connection.as_ref()),
            &CommandBatch::new(["echo one", "echo two", "echo three"]),
            &BatchPolicy::default(),
        )
        .await
        .expect("batch");

    let outputs: Vec<String> = results.iter().map(|r| r.stdout_text()).collect();
    assert_eq!(outputs, vec!["one\n", "two\n", "three\n"]);
    assert!(results.iter().all(|r| r.succeeded()));
}

#[tokio::test]
async fn per_command_mode_matches_reuse_semantics() {
    let host = FakeHost::new();
    host.reply("B", Reply::code(3));
    let session_spec = spec();

    let failure = runner()
        .run(
            Link::PerCommand {
                connector: &host,
                spec: &session_spec,
            },
            &CommandBatch::new(["A", "B", "C"]),
            &BatchPolicy::default().per_command(),
        )
        .await
        .expect_err("batch should fail");

    assert_eq!(failure.results.len(), 2);
    assert_eq!(host.executed(), vec!["A", "B"]);
    assert_eq!(host.connect_ports().len(), 2, "one connection per command");
    assert_eq!(host.open_connections(), 0, "every connection released");
}

#[tokio::test]
async fn lost_connection_aborts_even_when_continuing_on_failure() {
    let host = FakeHost::new();
    host.lose_connection_on("B");
    let connection = host.connect(&spec()).await.expect("connect");

    let failure = runner()
        .run(
            Link::Shared(connection.as_ref()),
            &CommandBatch::new(["A", "B", "C"]),
            &BatchPolicy::default().continue_on_failure(),
        )
        .await
        .expect_err("batch should fail");

    assert_eq!(failure.results.len(), 1);
    assert_eq!(host.executed(), vec!["A", "B"]);
    assert!(matches!(
        failure.cause,
        ExecutionError::ConnectionLost {
            command_index: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn capture_cap_sets_truncation_flag() {
    let host = FakeHost::new();
    host.reply("big", Reply::code(0).stdout(&"x".repeat(64)));
    let connection = host.connect(&spec()).await.expect("connect");
    let (logger, _sink) = memory_logger();
    let settings = Settings {
        max_capture_bytes: 16,
        ..Settings::default()
    };

    let results = BatchRunner::new(logger, &settings)
        .run(
            Link::Shared(connection.as_ref()),
            &CommandBatch::new(["big"]),
            &BatchPolicy::default(),
        )
        .await
        .expect("batch");

    assert_eq!(results[0].stdout.len(), 16);
    assert!(results[0].stdout_truncated);
    assert!(!results[0].stderr_truncated);
}

#[tokio::test]
async fn batch_timeout_overrides_default_and_aborts() {
    let host = FakeHost::new();
    host.hang_on("sleep 600");
    let connection = host.connect(&spec()).await.expect("connect");

    let failure = runner()
        .run(
            Link::Shared(connection.as_ref()),
            &CommandBatch::new(["A", "sleep 600", "C"]),
            &BatchPolicy::default().with_command_timeout_ms(50),
        )
        .await
        .expect_err("hung command");

    assert_eq!(failure.results.len(), 1);
    assert_eq!(host.executed(), vec!["A", "sleep 600"]);
    match &failure.cause {
        ExecutionError::ConnectionLost {
            command_index,
            message,
            ..
        } => {
            assert_eq!(*command_index, 1);
            assert!(message.contains("50 ms"), "{}", message);
        }
        other => panic!("unexpected cause {:?}", other),
    }
}
