use crate::config::Settings;
use crate::constants::limits::COMMAND_SUBSTRING_LENGTH;
use crate::errors::ExecutionError;
use crate::managers::transport::{Connection, Connector, ExecLimits, ExecOutput};
use crate::model::{BatchPolicy, CommandBatch, CommandResult, ConnectionSpec};
use crate::services::logger::Logger;
use crate::utils::text::abbreviate_command;
use std::time::Instant;

/// Where a batch's commands run.
pub enum Link<'a> {
    /// The session's active connection.
    Shared(&'a dyn Connection),
    /// A fresh connection per command, released after each one.
    PerCommand {
        connector: &'a dyn Connector,
        spec: &'a ConnectionSpec,
    },
}

/// Results gathered before the batch stopped, and why it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub results: Vec<CommandResult>,
    pub cause: ExecutionError,
}

#[derive(Clone)]
pub struct BatchRunner {
    logger: Logger,
    max_capture_bytes: usize,
    default_timeout_ms: Option<u64>,
    log_output: bool,
}

impl BatchRunner {
    pub fn new(logger: Logger, settings: &Settings) -> Self {
        Self {
            logger: logger.child("batch"),
            max_capture_bytes: settings.max_capture_bytes,
            default_timeout_ms: settings.command_timeout_ms,
            log_output: settings.log_command_output,
        }
    }

    /// Runs the commands strictly in order. With `stop_on_first_failure` the
    /// batch halts at the first rejected command; otherwise every command runs
    /// and the first rejection is reported at the end. A broken link always
    /// halts.
    pub async fn run(
        &self,
        link: Link<'_>,
        batch: &CommandBatch,
        policy: &BatchPolicy,
    ) -> Result<Vec<CommandResult>, BatchFailure> {
        let total = batch.len();
        let limits = ExecLimits {
            timeout_ms: policy.command_timeout_ms.or(self.default_timeout_ms),
            max_capture_bytes: self.max_capture_bytes,
        };
        let mut results: Vec<CommandResult> = Vec::with_capacity(total);
        let mut first_rejection: Option<ExecutionError> = None;

        for (index, command) in batch.iter().enumerate() {
            self.logger.info(
                &format!(
                    "[{}/{}] {}",
                    index + 1,
                    total,
                    abbreviate_command(command, COMMAND_SUBSTRING_LENGTH)
                ),
                None,
            );
            let started = Instant::now();
            let output = match self.exec_one(&link, command, limits).await {
                Ok(output) => output,
                Err(message) => {
                    self.logger.error(
                        &format!("connection lost on command {} of {}", index + 1, total),
                        Some(&serde_json::json!({ "error": message })),
                    );
                    return Err(BatchFailure {
                        results,
                        cause: ExecutionError::ConnectionLost {
                            command_index: index,
                            total,
                            command: command.clone(),
                            message,
                        },
                    });
                }
            };

            let result = CommandResult {
                command: command.clone(),
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
                stdout_truncated: output.stdout_truncated,
                stderr_truncated: output.stderr_truncated,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            self.log_result(index, total, &result);

            if !result.succeeded() {
                let cause = ExecutionError::CommandRejected {
                    command_index: index,
                    total,
                    command: command.clone(),
                    status: result.status.clone(),
                };
                results.push(result);
                if policy.stop_on_first_failure {
                    return Err(BatchFailure { results, cause });
                }
                first_rejection.get_or_insert(cause);
                continue;
            }
            results.push(result);
        }

        match first_rejection {
            Some(cause) => Err(BatchFailure { results, cause }),
            None => Ok(results),
        }
    }

    async fn exec_one(
        &self,
        link: &Link<'_>,
        command: &str,
        limits: ExecLimits,
    ) -> Result<ExecOutput, String> {
        match link {
            Link::Shared(connection) => connection
                .exec(command, limits)
                .await
                .map_err(|err| err.to_string()),
            Link::PerCommand { connector, spec } => {
                let connection = connector
                    .connect(spec)
                    .await
                    .map_err(|err| format!("reconnect failed: {}", err))?;
                let output = connection
                    .exec(command, limits)
                    .await
                    .map_err(|err| err.to_string());
                connection.close().await;
                output
            }
        }
    }

    fn log_result(&self, index: usize, total: usize, result: &CommandResult) {
        let meta = serde_json::json!({
            "status": result.status,
            "duration_ms": result.duration_ms,
            "stdout_truncated": result.stdout_truncated,
            "stderr_truncated": result.stderr_truncated,
        });
        if result.succeeded() {
            self.logger
                .debug(&format!("command {} of {} finished", index + 1, total), Some(&meta));
        } else {
            self.logger.warn(
                &format!("command {} of {} {}", index + 1, total, result.status),
                Some(&meta),
            );
        }
        if !self.log_output {
            return;
        }
        for line in result.stdout_text().lines().filter(|l| !l.trim().is_empty()) {
            self.logger.info(&format!("stdout: {}", line), None);
        }
        for line in result.stderr_text().lines().filter(|l| !l.trim().is_empty()) {
            self.logger.info(&format!("stderr: {}", line), None);
        }
    }
}
