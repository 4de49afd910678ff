//! Tests for `run_context`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{GraphNode, Operator, TaskValue};
use crate::run_context::{RunContext, TaskContext};

struct NoopOperator;

impl Operator for NoopOperator {}

fn value(v: &str) -> TaskValue {
  Arc::new(v.to_string())
}

fn text(v: &TaskValue) -> &str {
  v.downcast_ref::<String>().map(String::as_str).unwrap_or("")
}

fn ctx() -> RunContext {
  let mut names = HashMap::new();
  names.insert("load".to_string(), "n1".to_string());
  RunContext::new(names, false)
}

#[test]
fn output_roundtrip() {
  let ctx = ctx();
  ctx.record_output("n1", value("rows"));
  let out = ctx.output_for("load").unwrap();
  assert_eq!(text(&out), "rows");
}

#[test]
fn unknown_task_name_is_an_error() {
  let ctx = ctx();
  assert!(matches!(
    ctx.output_for("missing").unwrap_err(),
    GraphError::UnknownTask(_)
  ));
}

#[test]
fn missing_output_is_an_error() {
  let ctx = ctx();
  assert!(matches!(
    ctx.output_for("load").unwrap_err(),
    GraphError::MissingOutput(_)
  ));
}

#[test]
fn empty_task_name_is_invalid() {
  let ctx = ctx();
  assert!(matches!(
    ctx.output_for("").unwrap_err(),
    GraphError::InvalidArgument(_)
  ));
}

#[tokio::test]
async fn duplicate_shared_key_errors_without_overwrite() {
  let ctx = ctx();
  ctx.put_shared("k", value("1"), false).await.unwrap();
  let err = ctx.put_shared("k", value("2"), false).await.unwrap_err();
  assert!(matches!(err, GraphError::DuplicateKey(_)));
  ctx.put_shared("k", value("2"), true).await.unwrap();
  let stored = ctx.get_shared("k").await.unwrap();
  assert_eq!(text(&stored), "2");
}

#[tokio::test]
async fn absent_shared_key_reads_as_none() {
  let ctx = ctx();
  assert!(ctx.get_shared("nothing").await.is_none());
}

#[tokio::test]
async fn task_namespaces_do_not_collide() {
  let ctx = ctx();
  ctx.put_task_shared("t1", "k", value("x"), false).await.unwrap();
  ctx.put_task_shared("t2", "k", value("y"), false).await.unwrap();
  let x = ctx.get_task_shared("t1", "k").await.unwrap().unwrap();
  let y = ctx.get_task_shared("t2", "k").await.unwrap().unwrap();
  assert_eq!(text(&x), "x");
  assert_eq!(text(&y), "y");
}

#[tokio::test]
async fn duplicate_task_shared_key_errors_without_overwrite() {
  let ctx = ctx();
  ctx.put_task_shared("t1", "k", value("x"), false).await.unwrap();
  let err = ctx
    .put_task_shared("t1", "k", value("y"), false)
    .await
    .unwrap_err();
  assert!(matches!(err, GraphError::DuplicateKey(_)));
}

#[tokio::test]
async fn separator_is_rejected_in_names_and_keys() {
  let ctx = ctx();
  let err = ctx
    .put_task_shared("t1___$$$$$$___x", "k", value("v"), false)
    .await
    .unwrap_err();
  assert!(matches!(err, GraphError::ReservedSeparator { .. }));
  let err = ctx.get_task_shared("t1", "k___$$$$$$___x").await.unwrap_err();
  assert!(matches!(err, GraphError::ReservedSeparator { .. }));
}

#[tokio::test]
async fn empty_task_shared_arguments_are_invalid() {
  let ctx = ctx();
  assert!(matches!(
    ctx.get_task_shared("", "k").await.unwrap_err(),
    GraphError::InvalidArgument(_)
  ));
  assert!(matches!(
    ctx.get_task_shared("t", "").await.unwrap_err(),
    GraphError::InvalidArgument(_)
  ));
}

#[test]
fn streaming_flag_and_current_task() {
  let ctx = RunContext::new(HashMap::new(), true);
  assert!(ctx.streaming());
  assert!(ctx.current_task().is_none());
  ctx.set_current_task(TaskContext::named("n1", "load"));
  let task = ctx.current_task().unwrap();
  assert_eq!(task.node_id(), "n1");
  assert_eq!(task.task_name(), Some("load"));
}

#[test]
fn for_graph_snapshots_the_name_table() {
  let graph = Graph::new("g");
  let _guard = graph.enter();
  let load = GraphNode::builder(Arc::new(NoopOperator))
    .id("n1")
    .name("load")
    .build();
  let parse = GraphNode::builder(Arc::new(NoopOperator))
    .id("n2")
    .name("parse")
    .build();
  load.pipe_to(&parse).unwrap();
  let ctx = RunContext::for_graph(&graph, false);
  ctx.record_output("n2", value("tokens"));
  assert_eq!(text(&ctx.output_for("parse").unwrap()), "tokens");
  assert!(matches!(
    ctx.output_for("other").unwrap_err(),
    GraphError::UnknownTask(_)
  ));
}
