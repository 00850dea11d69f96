//! Definition registry.
//!
//! Workflows, tasks and steps are registered once at startup. Registration
//! returns a typed handle ([`Workflow`], [`Task`], [`Step`]) which is what
//! callers pass to the engine; the registry resolves a handle back to its
//! [`Definition`] at call time.
//!
//! Every entrypoint receives the [`RunContext`] as its first argument. The
//! entrypoint signature `Fn(RunContext, A) -> Future<Output = anyhow::Result<R>>`
//! makes that a compile-time property instead of a registration-time check.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RunContext;
use crate::error::DefinitionError;
use crate::marshal::ReturnSchema;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// What a definition declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Workflow,
    Task,
    Step,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKind::Workflow => write!(f, "workflow"),
            DefinitionKind::Task => write!(f, "task"),
            DefinitionKind::Step => write!(f, "step"),
        }
    }
}

/// Immutable metadata for a registered workflow, task or step.
pub struct Definition {
    pub id: String,
    pub kind: DefinitionKind,
    /// Declared argument type, as reported by `std::any::type_name`.
    pub arg_type: &'static str,
    /// Declared return type, as reported by `std::any::type_name`.
    pub return_type: &'static str,
    pub timeout: Option<Duration>,
    pub(crate) return_schema: Option<ReturnSchema>,
}

impl Definition {
    pub fn return_schema(&self) -> Option<&serde_json::Value> {
        self.return_schema.as_ref().map(|s| s.schema())
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("arg_type", &self.arg_type)
            .field("return_type", &self.return_type)
            .field("timeout", &self.timeout)
            .field("return_schema", &self.return_schema())
            .finish()
    }
}

pub(crate) type Entrypoint<A, R> =
    Arc<dyn Fn(RunContext, A) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;

pub(crate) struct Registered<A, R> {
    pub(crate) definition: Arc<Definition>,
    pub(crate) entrypoint: Entrypoint<A, R>,
    pub(crate) registry_id: u64,
}

impl<A, R> Clone for Registered<A, R> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            entrypoint: self.entrypoint.clone(),
            registry_id: self.registry_id,
        }
    }
}

/// Anything that resolves to a registered definition.
pub trait Registration {
    fn definition(&self) -> &Arc<Definition>;

    #[doc(hidden)]
    fn registry_id(&self) -> u64;

    fn id(&self) -> &str {
        &self.definition().id
    }

    fn kind(&self) -> DefinitionKind {
        self.definition().kind
    }
}

macro_rules! registration_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<A, R>(pub(crate) Registered<A, R>);

        impl<A, R> Clone for $name<A, R> {
            fn clone(&self) -> Self {
                Self(self.0.clone())
            }
        }

        impl<A, R> fmt::Debug for $name<A, R> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&self.0.definition.id)
                    .finish()
            }
        }

        impl<A, R> Registration for $name<A, R> {
            fn definition(&self) -> &Arc<Definition> {
                &self.0.definition
            }

            fn registry_id(&self) -> u64 {
                self.0.registry_id
            }
        }
    };
}

registration_handle!(
    /// Handle to a registered workflow.
    Workflow
);
registration_handle!(
    /// Handle to a registered task.
    Task
);
registration_handle!(
    /// Handle to a registered step.
    Step
);

/// Collects the pieces of a definition before registration.
pub struct DefinitionBuilder<A, R> {
    kind: DefinitionKind,
    id: String,
    entrypoints: Vec<Entrypoint<A, R>>,
    timeout: Option<Duration>,
    return_schema: Option<serde_json::Value>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> DefinitionBuilder<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn new(kind: DefinitionKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            entrypoints: Vec::new(),
            timeout: None,
            return_schema: None,
            _marker: PhantomData,
        }
    }

    pub fn workflow(id: impl Into<String>) -> Self {
        Self::new(DefinitionKind::Workflow, id)
    }

    pub fn task(id: impl Into<String>) -> Self {
        Self::new(DefinitionKind::Task, id)
    }

    pub fn step(id: impl Into<String>) -> Self {
        Self::new(DefinitionKind::Step, id)
    }

    /// Mark `f` as the entrypoint. Registration rejects builders that end up
    /// with zero or several entrypoints.
    pub fn entrypoint<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RunContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let entry: Entrypoint<A, R> = Arc::new(move |ctx, args| Box::pin(f(ctx, args)));
        self.entrypoints.push(entry);
        self
    }

    /// Fail the step with a timeout once its body runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// JSON schema the serialized return value must satisfy.
    pub fn return_schema(mut self, schema: serde_json::Value) -> Self {
        self.return_schema = Some(schema);
        self
    }
}

/// Process-wide table of definitions, populated before any run starts.
pub struct Registry {
    id: u64,
    definitions: HashMap<(DefinitionKind, String), Arc<Definition>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            definitions: HashMap::new(),
        }
    }

    /// Register a workflow with a single entrypoint.
    pub fn workflow<A, R, F, Fut>(&mut self, id: &str, f: F) -> Result<Workflow<A, R>, DefinitionError>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(RunContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register_workflow(DefinitionBuilder::workflow(id).entrypoint(f))
    }

    /// Register a task with a single entrypoint.
    pub fn task<A, R, F, Fut>(&mut self, id: &str, f: F) -> Result<Task<A, R>, DefinitionError>
    where
        A: Serialize + Send + 'static,
        R: Serialize + serde::de::DeserializeOwned + Send + 'static,
        F: Fn(RunContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register_task(DefinitionBuilder::task(id).entrypoint(f))
    }

    /// Register a step with a single entrypoint.
    pub fn step<A, R, F, Fut>(&mut self, id: &str, f: F) -> Result<Step<A, R>, DefinitionError>
    where
        A: Serialize + Send + 'static,
        R: Serialize + serde::de::DeserializeOwned + Send + 'static,
        F: Fn(RunContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register_step(DefinitionBuilder::step(id).entrypoint(f))
    }

    pub fn register_workflow<A, R>(
        &mut self,
        builder: DefinitionBuilder<A, R>,
    ) -> Result<Workflow<A, R>, DefinitionError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        self.register(DefinitionKind::Workflow, builder).map(Workflow)
    }

    pub fn register_task<A, R>(
        &mut self,
        builder: DefinitionBuilder<A, R>,
    ) -> Result<Task<A, R>, DefinitionError>
    where
        A: Serialize + Send + 'static,
        R: Serialize + serde::de::DeserializeOwned + Send + 'static,
    {
        self.register(DefinitionKind::Task, builder).map(Task)
    }

    pub fn register_step<A, R>(
        &mut self,
        builder: DefinitionBuilder<A, R>,
    ) -> Result<Step<A, R>, DefinitionError>
    where
        A: Serialize + Send + 'static,
        R: Serialize + serde::de::DeserializeOwned + Send + 'static,
    {
        self.register(DefinitionKind::Step, builder).map(Step)
    }

    fn register<A, R>(
        &mut self,
        expected: DefinitionKind,
        mut builder: DefinitionBuilder<A, R>,
    ) -> Result<Registered<A, R>, DefinitionError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let kind = builder.kind;
        let id = builder.id.clone();

        if kind != expected {
            return Err(DefinitionError::KindMismatch {
                id,
                expected,
                found: kind,
            });
        }
        if id.trim().is_empty() {
            return Err(DefinitionError::EmptyId { kind });
        }
        let entrypoint = match builder.entrypoints.len() {
            0 => return Err(DefinitionError::MissingEntrypoint { kind, id }),
            1 => builder.entrypoints.remove(0),
            count => {
                return Err(DefinitionError::DuplicateEntrypoint { kind, id, count });
            }
        };
        if builder.timeout.is_some() && kind != DefinitionKind::Step {
            return Err(DefinitionError::InvalidOption {
                kind,
                id,
                reason: "only steps accept a timeout".to_string(),
            });
        }
        if builder.return_schema.is_some() && kind == DefinitionKind::Workflow {
            return Err(DefinitionError::InvalidOption {
                kind,
                id,
                reason: "workflow results are not cached, a return schema has no effect".to_string(),
            });
        }
        if self.definitions.contains_key(&(kind, id.clone())) {
            return Err(DefinitionError::DuplicateId { kind, id });
        }

        let return_schema = match builder.return_schema.take() {
            Some(schema) => Some(ReturnSchema::compile(schema).map_err(|reason| {
                DefinitionError::InvalidSchema {
                    kind,
                    id: id.clone(),
                    reason,
                }
            })?),
            None => None,
        };

        let definition = Arc::new(Definition {
            id: id.clone(),
            kind,
            arg_type: std::any::type_name::<A>(),
            return_type: std::any::type_name::<R>(),
            timeout: builder.timeout,
            return_schema,
        });
        self.definitions.insert((kind, id.clone()), definition.clone());
        debug!(kind = %kind, id = %id, "Registered definition");

        Ok(Registered {
            definition,
            entrypoint,
            registry_id: self.id,
        })
    }

    /// Resolve a registration handle to its definition.
    ///
    /// Fails if the handle was produced by a different registry.
    pub fn lookup<H: Registration + ?Sized>(
        &self,
        handle: &H,
    ) -> Result<Arc<Definition>, DefinitionError> {
        self.resolve(handle.definition(), handle.registry_id())
    }

    pub(crate) fn resolve(
        &self,
        definition: &Arc<Definition>,
        registry_id: u64,
    ) -> Result<Arc<Definition>, DefinitionError> {
        let unregistered = || DefinitionError::Unregistered {
            kind: definition.kind,
            id: definition.id.clone(),
        };

        if registry_id != self.id {
            return Err(unregistered());
        }
        self.definitions
            .get(&(definition.kind, definition.id.clone()))
            .filter(|d| Arc::ptr_eq(d, definition))
            .cloned()
            .ok_or_else(unregistered)
    }

    /// Look up a definition by kind and id.
    pub fn get(&self, kind: DefinitionKind, id: &str) -> Option<Arc<Definition>> {
        self.definitions.get(&(kind, id.to_string())).cloned()
    }

    /// List all registered definitions, sorted by kind then id.
    pub fn list(&self) -> Vec<Arc<Definition>> {
        let mut entries: Vec<Arc<Definition>> = self.definitions.values().cloned().collect();
        entries.sort_by(|a, b| {
            (a.kind as u8, a.id.as_str()).cmp(&(b.kind as u8, b.id.as_str()))
        });
        entries
    }
}
