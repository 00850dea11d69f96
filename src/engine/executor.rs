use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::agents::AgentMap;
use crate::config::RunConfig;
use crate::context::{RunContext, RunIdentity};
use crate::engine::types::*;
use crate::error::{DefinitionError, Error, ExecutionError, Result};
use crate::registry::{Registration, Registry, Workflow};
use crate::storage::validate_run_id;
use crate::tree::{CloseStatus, RunTree};

/// Starts, resumes and inspects workflow runs.
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: Arc<Registry>,
    agents: Arc<AgentMap>,
}

impl WorkflowEngine {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            agents: Arc::new(AgentMap::new()),
        }
    }

    /// Agents made available to every run through the run context.
    pub fn with_agents(mut self, agents: AgentMap) -> Self {
        self.agents = Arc::new(agents);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn agents(&self) -> &AgentMap {
        &self.agents
    }

    /// Start a new run of `workflow` and wait for its result.
    pub async fn run_workflow<A, R>(
        &self,
        workflow: &Workflow<A, R>,
        args: A,
        config: Arc<RunConfig>,
    ) -> Result<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let run_id = Uuid::new_v4().to_string();
        let attempt_id = Uuid::new_v4().to_string();
        self.execute(workflow, run_id, attempt_id, args, config).await
    }

    /// Run `workflow` again under an existing `run_id`.
    ///
    /// The entrypoint starts from the top. With the same durable config, every
    /// task and step that completed in an earlier attempt returns its cached
    /// result, so only work that never completed runs again.
    ///
    /// A run id with path separators or `..` is [`Error::InvalidRunId`].
    pub async fn retry_workflow<A, R>(
        &self,
        workflow: &Workflow<A, R>,
        run_id: &str,
        args: A,
        config: Arc<RunConfig>,
    ) -> Result<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let attempt_id = Uuid::new_v4().to_string();
        self.execute(workflow, run_id.to_string(), attempt_id, args, config)
            .await
    }

    /// Start a new run on the tokio runtime and return a handle to it.
    pub fn spawn_workflow<A, R>(
        &self,
        workflow: &Workflow<A, R>,
        args: A,
        config: Arc<RunConfig>,
    ) -> WorkflowRunHandle<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        self.spawn(workflow, Uuid::new_v4().to_string(), args, config)
    }

    /// Spawned counterpart of [`retry_workflow`](Self::retry_workflow).
    pub fn respawn_workflow<A, R>(
        &self,
        workflow: &Workflow<A, R>,
        run_id: &str,
        args: A,
        config: Arc<RunConfig>,
    ) -> WorkflowRunHandle<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        self.spawn(workflow, run_id.to_string(), args, config)
    }

    fn spawn<A, R>(
        &self,
        workflow: &Workflow<A, R>,
        run_id: String,
        args: A,
        config: Arc<RunConfig>,
    ) -> WorkflowRunHandle<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let attempt_id = Uuid::new_v4().to_string();
        let engine = self.clone();
        let task_workflow = workflow.clone();
        let task_run_id = run_id.clone();
        let task_attempt_id = attempt_id.clone();
        let join = tokio::spawn(async move {
            engine
                .execute(&task_workflow, task_run_id, task_attempt_id, args, config)
                .await
        });
        WorkflowRunHandle {
            workflow_id: workflow.id().to_string(),
            run_id,
            attempt_id,
            join,
        }
    }

    async fn execute<A, R>(
        &self,
        workflow: &Workflow<A, R>,
        run_id: String,
        attempt_id: String,
        args: A,
        config: Arc<RunConfig>,
    ) -> Result<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let definition = self.registry.lookup(workflow)?;
        let workflow_id = definition.id.clone();
        validate_run_id(&run_id)?;

        let record = config
            .run_store
            .init_run(&run_id, &workflow_id)
            .await
            .map_err(Error::Storage)?;
        if record.workflow_id != workflow_id {
            return Err(DefinitionError::WorkflowMismatch {
                run_id,
                expected: workflow_id,
                found: record.workflow_id,
            }
            .into());
        }

        let attempt_number = record.attempts.len() as u32 + 1;
        let mut attempt = AttemptRecord::started(&attempt_id, attempt_number);
        config
            .run_store
            .upsert_attempt(&run_id, &attempt)
            .await
            .map_err(Error::Storage)?;

        let tree = RunTree::new();
        let identity = RunIdentity {
            workflow_id: workflow_id.clone(),
            run_id: run_id.clone(),
            attempt_id: attempt_id.clone(),
            attempt: attempt_number,
        };
        let ctx = RunContext::new(
            identity,
            self.agents.clone(),
            config.clone(),
            self.registry.clone(),
            tree.clone(),
        );
        let span = ctx.logger().span().clone();

        info!(
            workflow_id = %workflow_id,
            run_id = %run_id,
            attempt = attempt_number,
            "Starting workflow run"
        );
        let outcome = (workflow.0.entrypoint)(ctx, args).instrument(span).await;

        let (status, error_text) = match &outcome {
            Ok(_) => {
                tree.close_root(CloseStatus::Completed);
                (RunStatus::Completed, None)
            }
            Err(e) => {
                tree.close_root(CloseStatus::Failed);
                (RunStatus::Failed, Some(format!("{:#}", e)))
            }
        };
        attempt.finish(status, error_text, tree.snapshot());
        let recorded = config.run_store.upsert_attempt(&run_id, &attempt).await;
        if let Err(ref e) = recorded {
            error!(run_id = %run_id, error = %e, "Failed to record run attempt");
        }

        match outcome {
            Ok(value) => {
                recorded.map_err(Error::Storage)?;
                info!(workflow_id = %workflow_id, run_id = %run_id, "Workflow run completed");
                Ok(value)
            }
            Err(source) => {
                warn!(
                    workflow_id = %workflow_id,
                    run_id = %run_id,
                    attempt_id = %attempt_id,
                    error = %source,
                    "Workflow run failed"
                );
                Err(ExecutionError {
                    workflow_id,
                    run_id,
                    attempt_id,
                    source,
                }
                .into())
            }
        }
    }

    /// Recorded state of a run.
    pub async fn get_run(&self, config: &RunConfig, run_id: &str) -> Result<RunRecord> {
        config
            .run_store
            .get_run_info(run_id)
            .await
            .map_err(Error::Storage)
    }

    /// Recorded runs, optionally filtered by status, newest first.
    pub async fn list_runs(
        &self,
        config: &RunConfig,
        status: Option<RunStatus>,
    ) -> Result<Vec<RunRecord>> {
        config
            .run_store
            .list_runs(status)
            .await
            .map_err(Error::Storage)
    }

    pub async fn delete_run(&self, config: &RunConfig, run_id: &str) -> Result<()> {
        config
            .run_store
            .delete_run(run_id)
            .await
            .map_err(Error::Storage)
    }
}

/// Handle to a run started with `spawn_workflow` or `respawn_workflow`.
pub struct WorkflowRunHandle<R> {
    workflow_id: String,
    run_id: String,
    attempt_id: String,
    join: JoinHandle<Result<R>>,
}

impl<R> WorkflowRunHandle<R> {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to finish.
    pub async fn result(self) -> Result<R> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(ExecutionError {
                workflow_id: self.workflow_id,
                run_id: self.run_id,
                attempt_id: self.attempt_id,
                source: anyhow::Error::new(e).context("workflow task did not complete"),
            }
            .into()),
        }
    }
}
