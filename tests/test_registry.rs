//! Definition registration and lookup.

use std::time::Duration;

use durflow::registry::*;
use durflow::{DefinitionError, RunContext};
use serde_json::json;

async fn echo(_ctx: RunContext, input: String) -> anyhow::Result<String> {
    Ok(input)
}

#[test]
fn register_and_lookup() {
    let mut registry = Registry::new();
    let step = registry.step("echo", echo).unwrap();
    let task = registry.task("echo", echo).unwrap();
    let workflow = registry.workflow("echo", echo).unwrap();

    assert_eq!(step.id(), "echo");
    assert_eq!(step.kind(), DefinitionKind::Step);
    assert_eq!(task.kind(), DefinitionKind::Task);
    assert_eq!(workflow.kind(), DefinitionKind::Workflow);

    let def = registry.lookup(&step).unwrap();
    assert_eq!(def.id, "echo");
    assert!(def.arg_type.contains("String"));
    assert!(def.return_type.contains("String"));

    assert_eq!(registry.list().len(), 3);
    assert!(registry.get(DefinitionKind::Task, "echo").is_some());
    assert!(registry.get(DefinitionKind::Task, "missing").is_none());
}

#[test]
fn duplicate_id_is_rejected() {
    let mut registry = Registry::new();
    registry.step("s", echo).unwrap();
    let err = registry.step("s", echo).unwrap_err();
    assert!(matches!(err, DefinitionError::DuplicateId { ref id, .. } if id == "s"));
}

#[test]
fn empty_id_is_rejected() {
    let mut registry = Registry::new();
    let err = registry.task("  ", echo).unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::EmptyId {
            kind: DefinitionKind::Task
        }
    ));
}

#[test]
fn missing_entrypoint_is_rejected() {
    let mut registry = Registry::new();
    let err = registry
        .register_task(DefinitionBuilder::<String, String>::task("no-entry"))
        .unwrap_err();
    assert!(matches!(err, DefinitionError::MissingEntrypoint { ref id, .. } if id == "no-entry"));
    assert!(err.to_string().contains("no-entry"));
}

#[test]
fn several_entrypoints_are_rejected() {
    let mut registry = Registry::new();
    let err = registry
        .register_workflow(
            DefinitionBuilder::workflow("twice")
                .entrypoint(echo)
                .entrypoint(echo),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::DuplicateEntrypoint { count: 2, .. }
    ));
}

#[test]
fn builder_kind_must_match() {
    let mut registry = Registry::new();
    let err = registry
        .register_step(DefinitionBuilder::task("t").entrypoint(echo))
        .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::KindMismatch {
            expected: DefinitionKind::Step,
            found: DefinitionKind::Task,
            ..
        }
    ));
}

#[test]
fn timeout_only_on_steps() {
    let mut registry = Registry::new();
    let step = registry
        .register_step(
            DefinitionBuilder::step("slow")
                .entrypoint(echo)
                .timeout(Duration::from_secs(1)),
        )
        .unwrap();
    assert_eq!(step.definition().timeout, Some(Duration::from_secs(1)));

    let err = registry
        .register_task(
            DefinitionBuilder::task("slow")
                .entrypoint(echo)
                .timeout(Duration::from_secs(1)),
        )
        .unwrap_err();
    assert!(matches!(err, DefinitionError::InvalidOption { .. }));
}

#[test]
fn invalid_schema_is_rejected() {
    let mut registry = Registry::new();
    let err = registry
        .register_step(
            DefinitionBuilder::step("bad-schema")
                .entrypoint(echo)
                .return_schema(json!({"type": 12})),
        )
        .unwrap_err();
    assert!(matches!(err, DefinitionError::InvalidSchema { .. }));

    let ok = registry
        .register_step(
            DefinitionBuilder::step("good-schema")
                .entrypoint(echo)
                .return_schema(json!({"type": "string"})),
        )
        .unwrap();
    assert_eq!(
        ok.definition().return_schema(),
        Some(&json!({"type": "string"}))
    );
}

#[test]
fn handle_from_other_registry_is_unregistered() {
    let mut first = Registry::new();
    let mut second = Registry::new();
    let step = first.step("s", echo).unwrap();
    second.step("s", echo).unwrap();

    let err = second.lookup(&step).unwrap_err();
    assert!(matches!(err, DefinitionError::Unregistered { ref id, .. } if id == "s"));
}

#[test]
fn closures_are_entrypoints() {
    let mut registry = Registry::new();
    let prefix = "hello ".to_string();
    let step = registry
        .step("greet", move |_ctx: RunContext, name: String| {
            let prefix = prefix.clone();
            async move { Ok::<_, anyhow::Error>(format!("{}{}", prefix, name)) }
        })
        .unwrap();
    assert_eq!(step.id(), "greet");
}
