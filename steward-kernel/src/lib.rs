pub mod autonomy;
pub mod context;
pub mod error;
pub mod plan;

pub use autonomy::{AutonomyLevel, OperationClass, PermissionCheck};
pub use context::WorkflowContext;
pub use error::{DispatchError, ErrorKind, classify_provider_failure};
