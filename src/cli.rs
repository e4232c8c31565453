//! Command-line surface for the `provisioner` binary.

use crate::app::App;
use crate::config::Settings;
use crate::constants::network::{DEV_ENVIRONMENT_PORT, SSH_DEFAULT_PORT};
use crate::errors::ProvisionError;
use crate::model::{ConnectionSpec, Credential, HostKeyPolicy, ProvisioningRecipe, SessionOutcome};
use crate::recipes::{self, ProjectKind};
use crate::services::progress::{CancelToken, ProgressEvent, ProgressSink, RunContext};
use crate::utils::paths::expand_home_path;
use crate::utils::ssh_config::{default_config_path, ensure_host_entry};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_PASSWORD_ENV: &str = "PROVISIONER_PASSWORD";

/// Provision remote Linux hosts over SSH
#[derive(Parser, Debug)]
#[command(
    name = "provisioner",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a recipe described in a JSON file
    Run(RunArgs),
    /// Make sshd listen on an extra port and open it in the firewall
    OpenPort(OpenPortArgs),
    /// Install build tools and unpack the editor bootstrap archive
    DevEnv(DevEnvArgs),
    /// open-port followed by dev-env
    Setup(DevEnvArgs),
    /// Upload a project skeleton to ~/project
    NewProject(NewProjectArgs),
    /// Add (or find) a Host entry for a machine in the local ssh config
    SshHost(SshHostArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Host to provision; repeat to provision several hosts concurrently
    #[arg(long = "host", required = true)]
    pub hosts: Vec<String>,

    /// Remote user name
    #[arg(short, long)]
    pub user: String,

    /// SSH port for the first connection
    #[arg(long, default_value_t = SSH_DEFAULT_PORT)]
    pub port: u16,

    /// Environment variable holding the password
    #[arg(long, conflicts_with = "key")]
    pub password_env: Option<String>,

    /// Private key file
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Environment variable holding the key passphrase
    #[arg(long, requires = "key")]
    pub passphrase_env: Option<String>,

    /// Expected host key fingerprint (SHA256:...)
    #[arg(long)]
    pub host_key: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Attempts for connect steps that hit a timeout or unreachable host
    #[arg(long)]
    pub connect_attempts: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Recipe file (JSON)
    pub recipe: PathBuf,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct OpenPortArgs {
    /// Port sshd should additionally listen on
    #[arg(long, default_value_t = DEV_ENVIRONMENT_PORT)]
    pub dev_port: u16,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct DevEnvArgs {
    /// Editor bootstrap archive (.vscode.tar.gz)
    #[arg(long)]
    pub archive: PathBuf,
    #[arg(long, default_value_t = DEV_ENVIRONMENT_PORT)]
    pub dev_port: u16,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct NewProjectArgs {
    #[arg(long, value_enum)]
    pub kind: ProjectKind,
    #[arg(long)]
    pub name: String,
    /// Local directory holding the project skeleton
    #[arg(long)]
    pub source: PathBuf,
    #[arg(long, default_value_t = DEV_ENVIRONMENT_PORT)]
    pub dev_port: u16,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct SshHostArgs {
    /// Alias for a new Host block
    #[arg(long)]
    pub alias: String,
    #[arg(long)]
    pub hostname: String,
    #[arg(short, long)]
    pub user: String,
    #[arg(long, default_value_t = DEV_ENVIRONMENT_PORT)]
    pub port: u16,
    /// ssh config file (default ~/.ssh/config)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl TargetArgs {
    fn credential(&self) -> Result<Credential, ProvisionError> {
        if let Some(key) = &self.key {
            let passphrase = match &self.passphrase_env {
                Some(var) => Some(read_env_secret(var)?),
                None => None,
            };
            return Ok(Credential::key_file(expand_home_path(key), passphrase));
        }
        let var = self.password_env.as_deref().unwrap_or(DEFAULT_PASSWORD_ENV);
        Ok(Credential::password(read_env_secret(var)?))
    }

    fn specs(&self, settings: &Settings) -> Result<Vec<ConnectionSpec>, ProvisionError> {
        let credential = self.credential()?;
        let host_key = self
            .host_key
            .clone()
            .map(HostKeyPolicy::Pin)
            .unwrap_or_default();
        Ok(self
            .hosts
            .iter()
            .map(|host| {
                ConnectionSpec::new(host.trim(), self.user.trim(), credential.clone())
                    .with_port(self.port)
                    .with_connect_timeout_ms(
                        self.connect_timeout_ms.unwrap_or(settings.connect_timeout_ms),
                    )
                    .with_host_key(host_key.clone())
            })
            .collect())
    }
}

fn read_env_secret(var: &str) -> Result<String, ProvisionError> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProvisionError::invalid_params(format!("environment variable {} is not set", var))
                .with_hint("Credentials are read from the environment, never prompted for.")
        })
}

struct StderrProgress {
    host: String,
}

impl ProgressSink for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        eprintln!(
            "{} [{:>3}%] step {}/{}: {}",
            self.host,
            event.percent(),
            event.step_index + 1,
            event.total_steps,
            event.label
        );
    }
}

/// Parses the process arguments, runs the command and returns the exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("provisioner: {}", err);
            2
        }
    }
}

pub async fn execute(cli: Cli) -> Result<i32, ProvisionError> {
    match cli.command {
        Command::Run(args) => {
            let text = std::fs::read_to_string(&args.recipe)?;
            let recipe: ProvisioningRecipe = serde_json::from_str(&text)?;
            provision(&args.target, recipe).await
        }
        Command::OpenPort(args) => provision(&args.target, recipes::open_port(args.dev_port)?).await,
        Command::DevEnv(args) => {
            let recipe = recipes::dev_environment(&expand_home_path(&args.archive), args.dev_port)?;
            provision(&args.target, recipe).await
        }
        Command::Setup(args) => {
            let recipe = recipes::full_setup(&expand_home_path(&args.archive), args.dev_port)?;
            provision(&args.target, recipe).await
        }
        Command::NewProject(args) => {
            let recipe = recipes::new_project(
                args.kind,
                &args.name,
                &expand_home_path(&args.source),
                args.dev_port,
            )?;
            provision(&args.target, recipe).await
        }
        Command::SshHost(args) => {
            let path = args
                .config
                .map(expand_home_path)
                .unwrap_or_else(default_config_path);
            let lookup = ensure_host_entry(&path, &args.alias, &args.hostname, &args.user, args.port)?;
            println!("{}", serde_json::to_string_pretty(&lookup)?);
            Ok(0)
        }
    }
}

async fn provision(target: &TargetArgs, recipe: ProvisioningRecipe) -> Result<i32, ProvisionError> {
    let mut settings = Settings::from_env();
    if let Some(attempts) = target.connect_attempts {
        settings.retry.max_attempts = attempts.max(1);
    }
    let specs = target.specs(&settings)?;
    let app = App::from_settings(settings);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let logger = app.logger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            logger.warn("interrupt received; stopping after the current step", None);
            on_interrupt.cancel();
        }
    });

    let coordinator = &app.coordinator;
    let recipe = &recipe;
    let runs = specs.iter().map(|spec| {
        let ctx = RunContext::new(
            Arc::new(StderrProgress {
                host: spec.host.clone(),
            }),
            cancel.clone(),
        );
        async move {
            let outcome = coordinator.run(spec, recipe, &ctx).await;
            (spec.host.clone(), outcome)
        }
    });
    let outcomes: Vec<(String, SessionOutcome)> = futures::future::join_all(runs).await;

    for (host, outcome) in &outcomes {
        eprintln!("{}: {}", host, outcome.summary());
    }
    let failed = outcomes.iter().any(|(_, outcome)| !outcome.is_success());
    let rendered = if outcomes.len() == 1 {
        serde_json::to_string_pretty(&outcomes[0].1)?
    } else {
        let list: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|(host, outcome)| serde_json::json!({ "host": host, "outcome": outcome }))
            .collect();
        serde_json::to_string_pretty(&list)?
    };
    println!("{}", rendered);
    Ok(if failed { 1 } else { 0 })
}
