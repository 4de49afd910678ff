//! Per-run state: task outputs and namespaced shared data.
//!
//! One [RunContext] exists per end-to-end execution of a graph. The driving
//! scheduler creates it, records each node's output as it completes, and
//! discards it after the graph's after-run hooks finish. Nodes use it to
//! read sibling outputs and to exchange ad hoc data outside the normal
//! output-passing edges.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::trace;

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::TaskValue;

/// Separator between the task name and the key of task-scoped shared data.
/// Rejected inside task names and keys so flattened keys cannot collide
/// with ordinary key content.
pub(crate) const TASK_KEY_SEPARATOR: &str = "___$$$$$$___";

/// Flattens `(task_name, key)` into a single namespaced store key.
fn task_key(task_name: &str, key: &str) -> Result<String> {
  if task_name.is_empty() {
    return Err(GraphError::InvalidArgument(
      "task_name must not be empty".to_string(),
    ));
  }
  if key.is_empty() {
    return Err(GraphError::InvalidArgument("key must not be empty".to_string()));
  }
  if task_name.contains(TASK_KEY_SEPARATOR) {
    return Err(GraphError::ReservedSeparator {
      what: "task_name".to_string(),
      value: task_name.to_string(),
    });
  }
  if key.contains(TASK_KEY_SEPARATOR) {
    return Err(GraphError::ReservedSeparator {
      what: "key".to_string(),
      value: key.to_string(),
    });
  }
  Ok(format!("{task_name}{TASK_KEY_SEPARATOR}{key}"))
}

/// Execution record for the node the scheduler is currently driving.
#[derive(Debug, Clone)]
pub struct TaskContext {
  node_id: String,
  task_name: Option<String>,
}

impl TaskContext {
  pub fn new(node_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      task_name: None,
    }
  }

  pub fn named(node_id: impl Into<String>, task_name: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      task_name: Some(task_name.into()),
    }
  }

  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  pub fn task_name(&self) -> Option<&str> {
    self.task_name.as_deref()
  }
}

/// State carried through one execution of a graph.
///
/// Output and shared-data maps support concurrent reads once written; the
/// single-writer-per-key rule is enforced by the duplicate-key error, not by
/// locking.
pub struct RunContext {
  streaming: bool,
  /// Snapshot of the graph's name table, taken at construction.
  name_to_id: HashMap<String, String>,
  outputs: Mutex<HashMap<String, TaskValue>>,
  shared: Mutex<HashMap<String, TaskValue>>,
  current_task: Mutex<Option<TaskContext>>,
}

impl RunContext {
  /// Creates a run context from a name -> id table.
  pub fn new(name_to_id: HashMap<String, String>, streaming: bool) -> Self {
    Self {
      streaming,
      name_to_id,
      outputs: Mutex::new(HashMap::new()),
      shared: Mutex::new(HashMap::new()),
      current_task: Mutex::new(None),
    }
  }

  /// Creates a run context for one execution of `graph`.
  pub fn for_graph(graph: &Graph, streaming: bool) -> Self {
    Self::new(graph.name_to_id(), streaming)
  }

  /// Whether this run is a streaming-style call.
  pub fn streaming(&self) -> bool {
    self.streaming
  }

  /// The task context currently being driven, if the scheduler set one.
  pub fn current_task(&self) -> Option<TaskContext> {
    self.current_task.lock().unwrap().clone()
  }

  /// Points the run at the task currently being driven.
  pub fn set_current_task(&self, ctx: TaskContext) {
    *self.current_task.lock().unwrap() = Some(ctx);
  }

  /// Records the output a node produced. Write-once per node id in normal
  /// operation; the scheduler is the only writer.
  pub fn record_output(&self, node_id: impl Into<String>, value: TaskValue) {
    let node_id = node_id.into();
    trace!(node = %node_id, "task output recorded");
    self.outputs.lock().unwrap().insert(node_id, value);
  }

  /// Output of the task registered under `name`.
  ///
  /// An unknown name is an error, as is a known task that has not produced
  /// an output yet.
  pub fn output_for(&self, name: &str) -> Result<TaskValue> {
    if name.is_empty() {
      return Err(GraphError::InvalidArgument(
        "task name must not be empty".to_string(),
      ));
    }
    let id = self
      .name_to_id
      .get(name)
      .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;
    self
      .outputs
      .lock()
      .unwrap()
      .get(id)
      .cloned()
      .ok_or_else(|| GraphError::MissingOutput(name.to_string()))
  }

  /// Reads a run-global shared value.
  pub async fn get_shared(&self, key: &str) -> Option<TaskValue> {
    self.shared.lock().unwrap().get(key).cloned()
  }

  /// Writes a run-global shared value.
  ///
  /// Errors if `key` already exists and `overwrite` is false.
  pub async fn put_shared(
    &self,
    key: impl Into<String>,
    value: TaskValue,
    overwrite: bool,
  ) -> Result<()> {
    let key = key.into();
    let mut shared = self.shared.lock().unwrap();
    if !overwrite && shared.contains_key(&key) {
      return Err(GraphError::DuplicateKey(key));
    }
    trace!(key = %key, "shared data stored");
    shared.insert(key, value);
    Ok(())
  }

  /// Reads a shared value namespaced under `task_name`.
  pub async fn get_task_shared(&self, task_name: &str, key: &str) -> Result<Option<TaskValue>> {
    let key = task_key(task_name, key)?;
    Ok(self.shared.lock().unwrap().get(&key).cloned())
  }

  /// Writes a shared value namespaced under `task_name`, so two tasks using
  /// the same short key never clobber each other.
  pub async fn put_task_shared(
    &self,
    task_name: &str,
    key: &str,
    value: TaskValue,
    overwrite: bool,
  ) -> Result<()> {
    self.put_shared(task_key(task_name, key)?, value, overwrite).await
  }
}
