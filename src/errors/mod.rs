mod provision_error;
mod session_error;

pub use provision_error::{ProvisionError, ProvisionErrorKind};
pub use session_error::{ConnectError, ExecutionError, FailureCause, TransferError};
