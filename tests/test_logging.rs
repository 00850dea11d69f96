//! Subscriber setup and run-scoped logging.

use std::sync::Arc;

use durflow::{RunConfig, RunContext, Registry, WorkflowEngine, logging};

#[test]
fn init_is_safe_to_repeat() {
    logging::init_with_default("debug");
    assert!(!logging::init());
}

#[tokio::test]
async fn run_logger_carries_run_id() {
    let mut registry = Registry::new();
    let workflow = registry
        .workflow("logged", |ctx: RunContext, _: ()| async move {
            let logger = ctx.logger();
            logger.debug("debug line");
            logger.info("info line");
            logger.warn("warn line");
            logger.error("error line");
            Ok::<_, anyhow::Error>(logger.run_id().to_string())
        })
        .unwrap();

    let engine = WorkflowEngine::new(registry);
    let config = Arc::new(RunConfig::with_defaults());
    let logged_run_id = engine
        .run_workflow(&workflow, (), config.clone())
        .await
        .unwrap();

    let runs = engine.list_runs(&config, None).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, logged_run_id);
}
