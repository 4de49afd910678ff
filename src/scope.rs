//! Tracks which graph is currently being built.
//!
//! Two parallel stacks exist: one per OS thread, one per logical task that
//! opted in via [task_scoped]. A caller inside [task_scoped] resolves against
//! its task's own stack, so concurrently scheduled constructions never
//! observe each other's current graph. Plain synchronous callers resolve
//! against their thread's stack.

use std::cell::RefCell;
use std::future::Future;

use tracing::trace;

use crate::graph::Graph;

thread_local! {
  static THREAD_STACK: RefCell<Vec<Graph>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
  static TASK_STACK: RefCell<Vec<Graph>>;
}

/// Pushes `graph` as the current graph of the calling context.
pub(crate) fn enter(graph: Graph) {
  trace!(graph = %graph.id(), "entering graph scope");
  let in_task = TASK_STACK.try_with(|stack| stack.borrow_mut().push(graph.clone()));
  if in_task.is_err() {
    THREAD_STACK.with(|stack| stack.borrow_mut().push(graph));
  }
}

/// Pops the current graph of the calling context. No-op on an empty stack.
pub(crate) fn exit() {
  trace!("exiting graph scope");
  let in_task = TASK_STACK.try_with(|stack| {
    stack.borrow_mut().pop();
  });
  if in_task.is_err() {
    THREAD_STACK.with(|stack| {
      stack.borrow_mut().pop();
    });
  }
}

/// The graph currently being built in the calling context, if any.
pub fn current() -> Option<Graph> {
  TASK_STACK
    .try_with(|stack| stack.borrow().last().cloned())
    .unwrap_or_else(|_| THREAD_STACK.with(|stack| stack.borrow().last().cloned()))
}

/// Runs `future` with its own fresh task-scoped stack.
///
/// Graph scopes entered inside the future resolve against that stack only:
/// sibling tasks and the spawning thread each keep their own notion of
/// "current graph".
pub async fn task_scoped<F>(future: F) -> F::Output
where
  F: Future,
{
  TASK_STACK.scope(RefCell::new(Vec::new()), future).await
}
