//! # taskweave
//!
//! Graph-construction and execution-context core of a workflow engine.
//!
//! Callers assemble DAGs of [Operator] nodes declaratively: entering a
//! [Graph] scope makes it the implicit target for nodes built inside it,
//! dependency wiring (`set_upstream` / `pipe_to`) grows the edge lists, and
//! the graph answers the structural queries a scheduler needs to find where
//! execution starts and stops (roots, leaves, triggers). One [RunContext]
//! per execution carries task outputs and namespaced shared data between
//! nodes.
//!
//! ## Architecture
//!
//! - `scope`: dual thread-/task-scoped stacks of the graph currently being
//!   built; concurrent constructions never observe each other's scope.
//! - `node`: the [GraphNode] vertex handle, the [Operator] lifecycle trait
//!   and the dependency-wiring protocol.
//! - `graph`: the [Graph] container, structural classification and the
//!   after-run join barrier.
//! - `run_context`: per-execution task outputs and shared key-value state.
//!
//! The scheduler that walks the graph, concrete operators and any network
//! surface live in collaborating subsystems.

pub mod env;
pub mod error;
pub mod graph;
pub mod node;
pub mod run_context;
#[cfg(test)]
mod run_context_test;
pub mod scope;

pub use env::{GraphEnv, SystemHandle};
pub use error::{GraphError, HookError, HookFailure, Result};
pub use graph::{Graph, ScopeGuard};
pub use node::{GraphNode, IntoNodes, NodeBuilder, Operator, TaskValue};
pub use run_context::{RunContext, TaskContext};
