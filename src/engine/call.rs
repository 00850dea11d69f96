//! Task and step invocation through the call cache.
//!
//! A call resolves its definition, serializes the arguments and checks the
//! cache for the current run. A hit returns the decoded result without
//! opening a node or running the body. A miss opens a child node under the
//! caller's node, runs the body with a context bound to that node, stores the
//! result and closes the node COMPLETED. A failing body closes the node FAILED
//! and nothing is cached.
//!
//! The returned futures own everything they need, so several calls can be
//! created and then awaited together (`tokio::join!`, `try_join_all`) or
//! handed to `tokio::spawn`.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::callcache::CallCacheKind;
use crate::context::RunContext;
use crate::error::{DefinitionError, Error, Result};
use crate::marshal;
use crate::registry::{DefinitionKind, Registered, Step, Task};
use crate::tree::{CloseStatus, Target};

/// Call `step` with `args` from the body bound to `ctx`.
///
/// Step bodies run under the run's step concurrency limit and, if the step
/// declares one, its timeout.
pub fn call_step<A, R>(
    ctx: &RunContext,
    step: &Step<A, R>,
    args: A,
) -> impl Future<Output = Result<R>> + Send + 'static
where
    A: Serialize + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    invoke(ctx.clone(), step.0.clone(), args)
}

/// Call `task` with `args` from the body bound to `ctx`.
pub fn call_task<A, R>(
    ctx: &RunContext,
    task: &Task<A, R>,
    args: A,
) -> impl Future<Output = Result<R>> + Send + 'static
where
    A: Serialize + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    invoke(ctx.clone(), task.0.clone(), args)
}

enum Outcome<R> {
    Returned(anyhow::Result<R>),
    TimedOut(Duration),
}

async fn invoke<A, R>(ctx: RunContext, target: Registered<A, R>, args: A) -> Result<R>
where
    A: Serialize + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    let kind = target.definition.kind;
    let id = target.definition.id.clone();

    if ctx.position() == DefinitionKind::Step {
        let caller = ctx.node_info().map(|n| n.step).unwrap_or_default();
        return Err(DefinitionError::NestedCall { caller, kind, id }.into());
    }

    let definition = ctx
        .registry
        .resolve(&target.definition, target.registry_id)?;
    let cache_kind = match kind {
        DefinitionKind::Step => CallCacheKind::Step,
        _ => CallCacheKind::Task,
    };
    let cache = ctx.run_config().call_cache(cache_kind).clone();
    let run_id = ctx.run_id().to_string();

    let serialized_args = marshal::serialize_args(&args)?;
    let cached = cache
        .check(&run_id, &id, &serialized_args)
        .await
        .map_err(Error::Storage)?;
    if cached.found
        && let Some(value) = cached.result
    {
        if let Some(schema) = &definition.return_schema {
            schema.validate(&id, &value)?;
        }
        debug!(run_id = %run_id, kind = %kind, id = %id, "Returning cached result");
        return Ok(marshal::from_value(value)?);
    }

    let (child, handle) = match kind {
        DefinitionKind::Step => ctx.enter(Target::Step(&id), DefinitionKind::Step),
        _ => ctx.enter(Target::Task(&id), DefinitionKind::Task),
    };
    let node = handle.info().id();
    info!(run_id = %run_id, kind = %kind, id = %id, node = %node, "Opened node");

    let permit = match kind {
        DefinitionKind::Step => ctx.step_permits.clone().acquire_owned().await.ok(),
        _ => None,
    };
    let body = (target.entrypoint)(child, args);
    let outcome = match definition.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, body).await {
            Ok(returned) => Outcome::Returned(returned),
            Err(_) => Outcome::TimedOut(timeout),
        },
        None => Outcome::Returned(body.await),
    };
    drop(permit);

    match outcome {
        Outcome::Returned(Ok(value)) => {
            // Encode before the await so the future never holds `&R`.
            let encoded = marshal::serialize_result(&id, &value).and_then(|result| {
                if let Some(schema) = &definition.return_schema {
                    schema.validate(&id, &result)?;
                }
                Ok(result)
            });
            let stored = match encoded {
                Ok(result) => cache
                    .store(&run_id, &id, &serialized_args, &result)
                    .await
                    .map_err(Error::Storage),
                Err(e) => Err(e.into()),
            };
            match stored {
                Ok(()) => {
                    handle.close(CloseStatus::Completed);
                    info!(run_id = %run_id, kind = %kind, id = %id, node = %node, "Completed node");
                    Ok(value)
                }
                Err(e) => {
                    handle.close(CloseStatus::Failed);
                    warn!(run_id = %run_id, kind = %kind, id = %id, error = %e, "Result could not be stored");
                    Err(e)
                }
            }
        }
        Outcome::Returned(Err(source)) => {
            handle.close(CloseStatus::Failed);
            warn!(run_id = %run_id, kind = %kind, id = %id, node = %node, error = %source, "Node failed");
            Err(Error::CallFailed { kind, id, source })
        }
        Outcome::TimedOut(timeout) => {
            handle.close(CloseStatus::TimedOut);
            warn!(run_id = %run_id, id = %id, node = %node, ?timeout, "Step timed out");
            Err(Error::TimedOut { id, timeout })
        }
    }
}
