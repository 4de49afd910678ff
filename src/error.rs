//! Error types for graph construction, wiring and per-run state.

use thiserror::Error;

/// Result type alias using [GraphError].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Error type operator lifecycle hooks may return.
///
/// Hooks belong to collaborating subsystems, so their failures cross the
/// trait boundary as boxed errors rather than as [GraphError] variants.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// One failed after-run hook, collected by [crate::graph::Graph::finish].
#[derive(Debug)]
pub struct HookFailure {
  /// Id of the node whose hook failed.
  pub node_id: String,
  /// Rendered hook error.
  pub message: String,
}

/// Errors raised synchronously at the point of misuse. The core performs no
/// retry and no partial rollback.
#[derive(Debug, Error)]
pub enum GraphError {
  /// A wiring call or run-state accessor received an unusable argument.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// A node name is already taken by a different node in the same graph.
  #[error("node name {name} already exists in graph {graph}")]
  NamingConflict { name: String, graph: String },

  /// Dependency wiring found no graph on either side.
  #[error("dependency wiring requires a resolvable graph; bind a node or build inside a graph scope")]
  ScopeResolutionFailure,

  /// Dependency wiring or registration crossed two distinct graphs.
  #[error("cannot wire nodes across graphs {left} and {right}")]
  CrossGraphConflict { left: String, right: String },

  /// A task name is not present in the run's name table.
  #[error("unknown task name {0}")]
  UnknownTask(String),

  /// A task has not produced an output yet.
  #[error("no output recorded for task {0}")]
  MissingOutput(String),

  /// A shared-data key already exists and overwrite was not requested.
  #[error("shared data key {0} already exists")]
  DuplicateKey(String),

  /// A task name or key contains the internal namespacing separator.
  #[error("{what} must not contain the reserved separator: {value}")]
  ReservedSeparator { what: String, value: String },

  /// The graph contains at least one dependency cycle.
  #[error("graph {graph} contains a dependency cycle")]
  CycleDetected { graph: String },

  /// One or more after-run hooks failed during [crate::graph::Graph::finish].
  /// Every hook was still attempted before this was reported.
  #[error("after-run hook failed for {} node(s)", .failures.len())]
  AfterRunFailed { failures: Vec<HookFailure> },
}
