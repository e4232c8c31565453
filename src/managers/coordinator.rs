use crate::config::{RetryPolicy, Settings};
use crate::errors::FailureCause;
use crate::managers::runner::{BatchFailure, BatchRunner, Link};
use crate::managers::transfer::TransferAgent;
use crate::managers::transport::{Connection, Connector};
use crate::model::{
    CommandResult, ConnectionMode, ConnectionSpec, ProvisioningRecipe, SessionOutcome, Step,
    StepKind, StepRecord, TransferReport,
};
use crate::services::logger::Logger;
use crate::services::progress::{ProgressEvent, RunContext};
use crate::services::validation::Validation;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Transferring,
    RunningBatch,
    Succeeded,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Transferring => "transferring",
            SessionState::RunningBatch => "running_batch",
            SessionState::Succeeded => "succeeded",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed)
    }
}

/// Drives one recipe against one host. Holds no per-run state, so a single
/// coordinator can serve concurrent runs.
pub struct Coordinator {
    connector: Arc<dyn Connector>,
    logger: Logger,
    settings: Settings,
    retry: RetryPolicy,
    validation: Validation,
}

impl Coordinator {
    pub fn new(connector: Arc<dyn Connector>, logger: Logger, settings: &Settings) -> Self {
        Self {
            connector,
            logger: logger.child("coordinator"),
            settings: settings.clone(),
            retry: settings.retry,
            validation: Validation::new(),
        }
    }

    /// Retry applied to connect steps that fail with a transient error.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub async fn run(
        &self,
        spec: &ConnectionSpec,
        recipe: &ProvisioningRecipe,
        ctx: &RunContext,
    ) -> SessionOutcome {
        let mut run = RecipeRun::new(self, spec, recipe, ctx);
        let outcome = run.drive().await;
        run.release().await;
        outcome
    }
}

#[derive(Default)]
struct StepDone {
    results: Vec<CommandResult>,
    transfer: Option<TransferReport>,
}

struct StepFailure {
    cause: FailureCause,
    results: Vec<CommandResult>,
}

impl From<FailureCause> for StepFailure {
    fn from(cause: FailureCause) -> Self {
        Self {
            cause,
            results: Vec::new(),
        }
    }
}

struct RecipeRun<'a> {
    coordinator: &'a Coordinator,
    recipe: &'a ProvisioningRecipe,
    ctx: &'a RunContext,
    spec: ConnectionSpec,
    state: SessionState,
    connection: Option<Box<dyn Connection>>,
    records: Vec<StepRecord>,
    logger: Logger,
    runner: BatchRunner,
    transfer: TransferAgent,
}

impl<'a> RecipeRun<'a> {
    fn new(
        coordinator: &'a Coordinator,
        spec: &ConnectionSpec,
        recipe: &'a ProvisioningRecipe,
        ctx: &'a RunContext,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let logger = coordinator
            .logger
            .child(&format!("{}@{}", &session_id[..8], spec.host))
            .redacting(spec.credential.secrets());
        Self {
            coordinator,
            recipe,
            ctx,
            spec: spec.clone(),
            state: SessionState::Idle,
            connection: None,
            records: Vec::with_capacity(recipe.len()),
            runner: BatchRunner::new(logger.clone(), &coordinator.settings),
            transfer: TransferAgent::new(logger.clone(), &coordinator.settings),
            logger,
        }
    }

    fn enter(&mut self, next: SessionState) {
        self.logger.debug(
            &format!("{} -> {}", self.state.as_str(), next.as_str()),
            None,
        );
        self.state = next;
    }

    async fn drive(&mut self) -> SessionOutcome {
        let recipe = self.recipe;
        let total = recipe.len();
        self.logger.info(
            &format!("starting recipe {} ({} steps)", recipe.name, total),
            Some(&serde_json::json!({
                "address": self.spec.address(),
                "username": self.spec.username,
                "auth": self.spec.credential.method(),
            })),
        );

        if let Err(err) = self.coordinator.validation.connection_spec(&self.spec) {
            return self.fail(0, FailureCause::InvalidRecipe(err.to_string()), Vec::new());
        }
        if let Err(violation) = self.coordinator.validation.recipe(recipe) {
            let message = format!("step {}: {}", violation.step_index + 1, violation.message);
            return self.fail(
                violation.step_index,
                FailureCause::InvalidRecipe(message),
                Vec::new(),
            );
        }

        for (index, step) in recipe.steps.iter().enumerate() {
            if self.ctx.cancel.is_cancelled() {
                return self.fail(index, FailureCause::Cancelled, Vec::new());
            }
            let label = step.display_label();
            self.logger
                .info(&format!("step {} of {}: {}", index + 1, total, label), None);
            let started = Instant::now();
            let result = self.execute(step).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(done) => {
                    self.records.push(StepRecord {
                        index,
                        label: label.clone(),
                        kind: step.kind.name().to_string(),
                        succeeded: true,
                        duration_ms,
                        results: done.results,
                        transfer: done.transfer,
                    });
                    self.ctx.progress.report(ProgressEvent {
                        step_index: index,
                        total_steps: total,
                        label,
                    });
                }
                Err(failure) => {
                    self.records.push(StepRecord {
                        index,
                        label,
                        kind: step.kind.name().to_string(),
                        succeeded: false,
                        duration_ms,
                        results: failure.results.clone(),
                        transfer: None,
                    });
                    return self.fail(index, failure.cause, failure.results);
                }
            }
        }

        self.enter(SessionState::Succeeded);
        self.logger
            .info(&format!("recipe {} completed", self.recipe.name), None);
        SessionOutcome::Success {
            recipe: self.recipe.name.clone(),
            steps: std::mem::take(&mut self.records),
        }
    }

    async fn execute(&mut self, step: &Step) -> Result<StepDone, StepFailure> {
        match &step.kind {
            StepKind::Connect { port } => {
                self.enter(SessionState::Connecting);
                self.connect(*port).await?;
                Ok(StepDone::default())
            }
            StepKind::Transfer(spec) => {
                self.enter(SessionState::Transferring);
                let connection = self
                    .connection
                    .as_deref()
                    .ok_or(FailureCause::NotConnected)?;
                let report = self
                    .transfer
                    .transfer(connection, spec)
                    .await
                    .map_err(FailureCause::from)?;
                Ok(StepDone {
                    results: Vec::new(),
                    transfer: Some(report),
                })
            }
            StepKind::RunBatch { batch, policy } => {
                self.enter(SessionState::RunningBatch);
                let link = match policy.connection_mode {
                    ConnectionMode::Reuse => Link::Shared(
                        self.connection
                            .as_deref()
                            .ok_or(FailureCause::NotConnected)?,
                    ),
                    ConnectionMode::PerCommand => Link::PerCommand {
                        connector: self.coordinator.connector.as_ref(),
                        spec: &self.spec,
                    },
                };
                match self.runner.run(link, batch, policy).await {
                    Ok(results) => Ok(StepDone {
                        results,
                        transfer: None,
                    }),
                    Err(BatchFailure { results, cause }) => Err(StepFailure {
                        cause: cause.into(),
                        results,
                    }),
                }
            }
        }
    }

    async fn connect(&mut self, port: Option<u16>) -> Result<(), FailureCause> {
        if let Some(previous) = self.connection.take() {
            self.logger.debug("closing previous connection", None);
            previous.close().await;
        }
        if let Some(port) = port {
            self.spec.port = port;
        }
        let retry = self.coordinator.retry;
        let mut attempt = 1;
        loop {
            match self.coordinator.connector.connect(&self.spec).await {
                Ok(connection) => {
                    self.logger
                        .info(&format!("connected to {}", self.spec.address()), None);
                    self.connection = Some(connection);
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for(attempt);
                    self.logger.warn(
                        &format!(
                            "connect attempt {} of {} failed: {}",
                            attempt, retry.max_attempts, err
                        ),
                        Some(&serde_json::json!({ "retry_in_ms": delay.as_millis() as u64 })),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.logger.error(
                        &format!("connect to {} failed: {}", self.spec.address(), err),
                        None,
                    );
                    return Err(err.into());
                }
            }
        }
    }

    fn fail(
        &mut self,
        index: usize,
        cause: FailureCause,
        partial_results: Vec<CommandResult>,
    ) -> SessionOutcome {
        self.enter(SessionState::Failed);
        let total = self.recipe.len();
        let label = self
            .recipe
            .steps
            .get(index)
            .map(Step::display_label)
            .unwrap_or_else(|| "recipe".to_string());
        self.logger.error(
            &format!(
                "step {} of {} ({}) failed: {}",
                index + 1,
                total,
                label,
                cause
            ),
            None,
        );
        SessionOutcome::Failed {
            recipe: self.recipe.name.clone(),
            failed_step: index,
            total_steps: total,
            label,
            cause,
            partial_results,
            steps: std::mem::take(&mut self.records),
        }
    }

    async fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        debug_assert!(self.state.is_terminal());
    }
}
