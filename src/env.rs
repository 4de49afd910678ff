//! Process-wide runtime handles and the per-construction environment.
//!
//! Two handles are shared across the process: an opaque application object
//! and a worker pool for offloading blocking work. Both are set at most once;
//! a [GraphEnv] passed to a node builder overrides either for that node.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::runtime::Handle;
use tracing::warn;

/// Opaque handle to the shared application object nodes may consult.
pub type SystemHandle = Arc<dyn Any + Send + Sync>;

static SYSTEM: OnceCell<SystemHandle> = OnceCell::new();
static WORKER_POOL: OnceCell<Handle> = OnceCell::new();

/// Installs the process-wide system handle. Set once; later calls are
/// logged and ignored.
pub fn set_system(handle: SystemHandle) {
  if SYSTEM.set(handle).is_err() {
    warn!("system handle already set, ignoring");
  }
}

/// The process-wide system handle, if installed.
pub fn system() -> Option<SystemHandle> {
  SYSTEM.get().cloned()
}

/// Installs the process-wide worker pool used to offload blocking work.
/// Set once; later calls are logged and ignored.
pub fn set_worker_pool(handle: Handle) {
  if WORKER_POOL.set(handle).is_err() {
    warn!("worker pool already set, ignoring");
  }
}

/// The process-wide worker pool handle, if installed.
pub fn worker_pool() -> Option<Handle> {
  WORKER_POOL.get().cloned()
}

/// Runtime handles a node captures at construction.
///
/// Fields left unset fall back to the process-wide defaults when the node is
/// built.
#[derive(Clone, Default)]
pub struct GraphEnv {
  system: Option<SystemHandle>,
  worker_pool: Option<Handle>,
}

impl GraphEnv {
  pub fn new() -> Self {
    Self::default()
  }

  /// Overrides the system handle for nodes built with this environment.
  pub fn with_system(mut self, handle: SystemHandle) -> Self {
    self.system = Some(handle);
    self
  }

  /// Overrides the worker pool for nodes built with this environment.
  pub fn with_worker_pool(mut self, handle: Handle) -> Self {
    self.worker_pool = Some(handle);
    self
  }

  /// Snapshot with unset fields filled from the process-wide defaults.
  pub(crate) fn resolve(&self) -> GraphEnv {
    GraphEnv {
      system: self.system.clone().or_else(system),
      worker_pool: self.worker_pool.clone().or_else(worker_pool),
    }
  }

  pub fn system(&self) -> Option<&SystemHandle> {
    self.system.as_ref()
  }

  pub fn worker_pool(&self) -> Option<&Handle> {
    self.worker_pool.as_ref()
  }
}

impl fmt::Debug for GraphEnv {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GraphEnv")
      .field("system", &self.system.is_some())
      .field("worker_pool", &self.worker_pool.is_some())
      .finish()
  }
}
