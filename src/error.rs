//! Error taxonomy for the engine.
//!
//! Three families reach callers: [`DefinitionError`] for misuse of the
//! definition API, [`SerializationError`] for values that cannot be put into
//! (or taken out of) canonical form, and [`ExecutionError`] for a workflow
//! entrypoint that failed, carrying the ids needed to retry the run.

use std::time::Duration;

use crate::registry::DefinitionKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A task or step body returned an error.
    #[error("{kind} '{id}' failed")]
    CallFailed {
        kind: DefinitionKind,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step body ran past its declared timeout.
    #[error("step '{id}' timed out after {timeout:?}")]
    TimedOut { id: String, timeout: Duration },

    /// A run id that cannot name a run record.
    #[error("invalid run id '{run_id}': {reason}")]
    InvalidRunId { run_id: String, reason: &'static str },

    /// A call cache, cache backend or run store failed.
    #[error("storage error")]
    Storage(#[source] anyhow::Error),
}

/// The structure of the workflow program is wrong.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("{kind} definition has an empty id")]
    EmptyId { kind: DefinitionKind },

    #[error("{kind} '{id}' has no entrypoint")]
    MissingEntrypoint { kind: DefinitionKind, id: String },

    #[error("{kind} '{id}' declares {count} entrypoints, expected exactly one")]
    DuplicateEntrypoint {
        kind: DefinitionKind,
        id: String,
        count: usize,
    },

    #[error("{kind} '{id}' is already registered")]
    DuplicateId { kind: DefinitionKind, id: String },

    #[error("'{id}' was built as a {found} definition but registered as a {expected}")]
    KindMismatch {
        id: String,
        expected: DefinitionKind,
        found: DefinitionKind,
    },

    #[error("{kind} '{id}' has an invalid return schema: {reason}")]
    InvalidSchema {
        kind: DefinitionKind,
        id: String,
        reason: String,
    },

    #[error("{kind} '{id}' is misconfigured: {reason}")]
    InvalidOption {
        kind: DefinitionKind,
        id: String,
        reason: String,
    },

    #[error("{kind} '{id}' is not registered with this engine")]
    Unregistered { kind: DefinitionKind, id: String },

    #[error("step '{caller}' cannot call {kind} '{id}': steps cannot call other steps or tasks")]
    NestedCall {
        caller: String,
        kind: DefinitionKind,
        id: String,
    },

    #[error("run '{run_id}' belongs to workflow '{found}', not '{expected}'")]
    WorkflowMismatch {
        run_id: String,
        expected: String,
        found: String,
    },
}

/// A value could not be converted to or from its canonical form.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("argument '{argument}' cannot be serialized: {reason}")]
    Argument { argument: String, reason: String },

    #[error("result of '{definition}' cannot be serialized: {reason}")]
    Result { definition: String, reason: String },

    #[error("value cannot be decoded as {type_name}: {reason}")]
    Decode {
        type_name: &'static str,
        reason: String,
    },

    #[error("result of '{definition}' violates its return schema: {reason}")]
    Schema { definition: String, reason: String },
}

/// A workflow entrypoint failed. Retry with `run_id` to resume.
#[derive(Debug, thiserror::Error)]
#[error("workflow '{workflow_id}' run '{run_id}' (attempt '{attempt_id}') failed")]
pub struct ExecutionError {
    pub workflow_id: String,
    pub run_id: String,
    pub attempt_id: String,
    #[source]
    pub source: anyhow::Error,
}

impl ExecutionError {
    /// Engine error that caused the failure, if the chain contains one.
    pub fn engine_cause(&self) -> Option<&Error> {
        self.source.chain().find_map(|e| e.downcast_ref::<Error>())
    }
}
