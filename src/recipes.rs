//! Ready-made recipes for preparing a fresh Linux VM as a remote development
//! host. Every command is safe to re-run.

use crate::constants::network::SSH_DEFAULT_PORT;
use crate::constants::remote::{BOOTSTRAP_ARCHIVE, PROJECT_ROOT};
use crate::errors::ProvisionError;
use crate::model::{ProvisioningRecipe, Step, TransferSpec};
use crate::services::validation::Validation;
use crate::utils::paths::remote_join;
use crate::utils::shell::quote;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    Python,
    C,
}

impl ProjectKind {
    /// Directory name used on the host, e.g. `demo-0.1.1` for Python.
    pub fn versioned_name(self, name: &str) -> String {
        match self {
            ProjectKind::Python => format!("{}-0.1.1", name),
            ProjectKind::C => format!("{}-1.0", name),
        }
    }
}

/// Commands that make sshd listen on `port` as well as 22 and open the port in
/// the firewall.
pub fn open_port_commands(port: u16) -> Vec<String> {
    // Prepended so the directives precede any Match block.
    let directives = format!(
        "Port {}\\nPort {}\\nAllowTCPForwarding yes\\n",
        port, SSH_DEFAULT_PORT
    );
    vec![
        format!(
            "sudo grep -q '^Port {port}$' {cfg} || sudo bash -c \"printf '{directives}' | cat - {cfg} > /tmp/sshd_config.new && mv /tmp/sshd_config.new {cfg}\"",
            port = port,
            cfg = SSHD_CONFIG,
            directives = directives,
        ),
        format!(
            "sudo iptables -C INPUT -p tcp -m tcp --dport {port} -j ACCEPT 2>/dev/null || sudo iptables -A INPUT -p tcp -m tcp --dport {port} -j ACCEPT",
            port = port
        ),
        "sudo systemctl restart sshd".to_string(),
    ]
}

pub fn open_port(port: u16) -> Result<ProvisioningRecipe, ProvisionError> {
    let port = Validation::new().ensure_port(port as i64)?;
    Ok(ProvisioningRecipe::new("open_port")
        .step(Step::connect())
        .step(
            Step::run_batch(open_port_commands(port))
                .labeled(format!("Open SSH port {}", port)),
        ))
}

pub fn dev_environment_commands() -> Vec<String> {
    vec![
        "sudo tdnf install -y build-essential gdb".to_string(),
        "sudo tdnf install -y dos2unix".to_string(),
        format!("tar -xvf {}", BOOTSTRAP_ARCHIVE),
        format!("rm -f {}", BOOTSTRAP_ARCHIVE),
        format!("mkdir -p {}", PROJECT_ROOT),
    ]
}

/// Installs the toolchain and unpacks the editor bootstrap archive into the
/// home directory. Connects on `port`, which `open_port` must have opened.
pub fn dev_environment(archive: &Path, port: u16) -> Result<ProvisioningRecipe, ProvisionError> {
    let port = Validation::new().ensure_port(port as i64)?;
    Ok(ProvisioningRecipe::new("dev_environment")
        .step(Step::connect_on(port))
        .step(
            Step::transfer(TransferSpec::file(archive, BOOTSTRAP_ARCHIVE))
                .labeled("Upload editor bootstrap archive"),
        )
        .step(Step::run_batch(dev_environment_commands()).labeled("Install build tools")))
}

/// `open_port` then `dev_environment`, reconnecting on the new port in between.
pub fn full_setup(archive: &Path, port: u16) -> Result<ProvisioningRecipe, ProvisionError> {
    let mut recipe = open_port(port)?.extend(dev_environment(archive, port)?);
    recipe.name = "full_setup".to_string();
    Ok(recipe)
}

/// Uploads a local project skeleton to `project/<name>-<version>` and unpacks
/// the `.vscode.tar.gz` it carries, if any.
pub fn new_project(
    kind: ProjectKind,
    name: &str,
    source_dir: &Path,
    port: u16,
) -> Result<ProvisioningRecipe, ProvisionError> {
    let validation = Validation::new();
    let name = validation.ensure_project_name(name)?;
    let port = validation.ensure_port(port as i64)?;
    let remote_dir = remote_join(PROJECT_ROOT, &kind.versioned_name(&name));
    let archive = remote_join(&remote_dir, BOOTSTRAP_ARCHIVE);
    Ok(ProvisioningRecipe::new("new_project")
        .step(Step::connect_on(port))
        .step(
            Step::transfer(TransferSpec::tree(source_dir, remote_dir.clone()))
                .labeled(format!("Upload project to {}", remote_dir)),
        )
        .step(
            Step::run_batch(vec![
                format!(
                    "[ ! -f {archive} ] || tar -xvf {archive} -C {dir}",
                    archive = quote(&archive),
                    dir = quote(&remote_dir)
                ),
                format!("rm -f {}", quote(&archive)),
            ])
            .labeled("Unpack project settings"),
        ))
}
