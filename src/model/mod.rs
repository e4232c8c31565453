mod connection;
mod outcome;
mod recipe;

pub use connection::{ConnectionSpec, Credential, HostKeyPolicy, KeySource};
pub use outcome::{CommandResult, ExitStatus, SessionOutcome, StepRecord, TransferReport};
pub use recipe::{
    BatchPolicy, CommandBatch, ConnectionMode, ProvisioningRecipe, Step, StepKind, TransferKind,
    TransferSpec,
};
