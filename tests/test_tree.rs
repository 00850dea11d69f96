//! Run-state tree transitions, handles and spawn groups.

use durflow::tree::*;

#[test]
fn goto_relabels_current_node() {
    let tree = RunTree::new();
    assert_eq!(tree.current_node_id(), "__main__/__main__");

    tree.goto_step("step_1");
    assert_eq!(tree.current_node_id(), "__main__/step_1");

    tree.goto_task("task_1");
    assert_eq!(tree.current_node_id(), "task_1/__main__");

    tree.goto_step("step_1");
    assert_eq!(tree.current_node_id(), "task_1/step_1");

    // No nodes were created.
    assert_eq!(tree.len(), 1);
}

#[test]
fn call_and_close_return_to_parent() {
    let tree = RunTree::new();

    let step = tree.call_step("step_1");
    assert_eq!(tree.current_node_id(), "__main__/step_1");
    assert_eq!(tree.info(step.node()).unwrap().status, NodeStatus::Running);

    let parent = step.close(CloseStatus::Completed);
    assert_eq!(parent, tree.root());
    assert_eq!(tree.current_node_id(), "__main__/__main__");

    let task = tree.call_task("task_1");
    assert_eq!(tree.current_node_id(), "task_1/__main__");
    let task_node = task.node();
    task.close(CloseStatus::Failed);
    assert_eq!(tree.current_node_id(), "__main__/__main__");
    assert_eq!(tree.info(task_node).unwrap().status, NodeStatus::Failed);
}

#[test]
fn step_inside_task_keeps_task_label() {
    let tree = RunTree::new();
    let task = tree.call_task("ingest");
    let step = tree.call_step("fetch");
    assert_eq!(tree.current_node_id(), "ingest/fetch");

    step.close(CloseStatus::Completed);
    assert_eq!(tree.current_node_id(), "ingest/__main__");
    task.close(CloseStatus::Completed);
    assert_eq!(tree.current_node_id(), "__main__/__main__");
}

#[test]
fn out_of_order_close_uses_recorded_parent() {
    let tree = RunTree::new();

    let step1 = tree.call_step("step_1");
    assert_eq!(tree.current_node_id(), "__main__/step_1");
    let step2 = tree.call_step("step_2");
    assert_eq!(tree.current_node_id(), "__main__/step_2");

    // step_1 was opened under the root.
    step1.close(CloseStatus::Completed);
    assert_eq!(tree.current_node_id(), "__main__/__main__");

    // step_2 was opened under step_1, so closing it lands back on step_1.
    step2.close(CloseStatus::Completed);
    assert_eq!(tree.current_node_id(), "__main__/step_1");
}

#[test]
fn spawn_does_not_move_current() {
    let tree = RunTree::new();
    let first = tree.spawn_step("step_0");
    assert_eq!(tree.current_node_id(), "__main__/__main__");

    let mut group = tree.spawn_group();
    group.spawn_step("step_1");
    group.spawn_step("step_2");
    group.spawn_task("task_1");
    assert_eq!(tree.current_node_id(), "__main__/__main__");

    let children = tree.children(tree.root());
    assert_eq!(children.len(), 4);
    let labels: Vec<String> = children
        .iter()
        .map(|c| tree.info(*c).unwrap().id())
        .collect();
    assert_eq!(
        labels,
        vec!["__main__/step_0", "__main__/step_1", "__main__/step_2", "task_1/__main__"]
    );
    for child in &children {
        assert_eq!(tree.parent(*child), Some(tree.root()));
        assert_eq!(tree.info(*child).unwrap().status, NodeStatus::Running);
    }

    group.complete();
    let statuses: Vec<NodeStatus> = children
        .iter()
        .map(|c| tree.info(*c).unwrap().status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            NodeStatus::Running,
            NodeStatus::Completed,
            NodeStatus::Completed,
            NodeStatus::Completed
        ]
    );
    assert_eq!(tree.current_node_id(), "__main__/__main__");

    let first_node = first.node();
    first.close(CloseStatus::Completed);
    assert_eq!(tree.info(first_node).unwrap().status, NodeStatus::Completed);
    assert_eq!(tree.current_node_id(), "__main__/__main__");
}

#[test]
fn dropped_spawn_group_fails_open_nodes() {
    let tree = RunTree::new();
    let (closed, open) = {
        let mut group = tree.spawn_group();
        let closed = group.spawn_step("done");
        let open = group.spawn_step("pending").node();
        let closed_node = closed.node();
        closed.close(CloseStatus::Cancelled);
        (closed_node, open)
        // group dropped without complete()
    };

    assert_eq!(tree.info(closed).unwrap().status, NodeStatus::Cancelled);
    assert_eq!(tree.info(open).unwrap().status, NodeStatus::Failed);
    // The anchor is untouched.
    assert_eq!(tree.info(tree.root()).unwrap().status, NodeStatus::Running);
}

#[test]
fn spawn_group_finish_with_outcome() {
    let tree = RunTree::new();
    let mut group = tree.spawn_group();
    let node = group.spawn_task("t").node();
    let outcome: Result<(), &str> = Err("boom");
    group.finish_with(&outcome);
    assert_eq!(tree.info(node).unwrap().status, NodeStatus::Failed);
}

#[test]
fn spawn_group_anchor_is_current_node() {
    let tree = RunTree::new();
    let task = tree.call_task("fan_out");
    let mut group = tree.spawn_group();
    assert_eq!(group.anchor(), task.node());
    let a = group.spawn_step("a").node();
    assert_eq!(tree.info(a).unwrap().id(), "fan_out/a");
    assert_eq!(tree.parent(a), Some(task.node()));
    group.complete();
    task.close(CloseStatus::Completed);
}

#[test]
fn tree_invariant_holds_after_mixed_operations() {
    let tree = RunTree::new();
    let t = tree.call_task("t");
    let s = tree.call_step("s");
    let mut group = tree.spawn_group();
    group.spawn_step("x");
    group.spawn_task("y");
    group.complete();
    s.close(CloseStatus::TimedOut);
    t.close(CloseStatus::ContinuedAsNew);

    let snapshot = tree.snapshot();
    assert_eq!(snapshot.nodes.len(), 5);
    assert!(snapshot.root().parent.is_none());
    for (index, node) in snapshot.nodes.iter().enumerate().skip(1) {
        // Exactly one parent, listed as its child, created before it.
        let parent = node.parent.expect("non-root node has a parent");
        assert!(parent.index() < index);
        let parent_node = snapshot.node(parent).unwrap();
        let listed = parent_node
            .children
            .iter()
            .filter(|c| c.index() == index)
            .count();
        assert_eq!(listed, 1);
        assert!(node.info.status.is_terminal());
    }
}

#[test]
fn snapshot_serializes() {
    let tree = RunTree::new();
    tree.call_step("s").close(CloseStatus::Completed);
    let json = serde_json::to_value(tree.snapshot()).unwrap();
    assert_eq!(json["nodes"][1]["info"]["status"], "COMPLETED");
    assert_eq!(json["nodes"][1]["info"]["step"], "s");

    let back: TreeSnapshot = serde_json::from_value(json).unwrap();
    assert_eq!(back.children(NodeId::ROOT).len(), 1);
}
