pub mod call;
pub mod executor;
pub mod types;

pub use call::{call_step, call_task};
pub use executor::{WorkflowEngine, WorkflowRunHandle};
