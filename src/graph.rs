//! The graph container: node registry, scope bracket, structural queries and
//! graph-wide lifecycle completion.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use futures::future::join_all;
use tracing::{info, instrument, trace};
use uuid::Uuid;

use crate::error::{GraphError, HookFailure, Result};
use crate::node::GraphNode;
use crate::scope;

/// Structural classification, rebuilt after any registration.
struct Classified {
  roots: Vec<GraphNode>,
  leaves: Vec<GraphNode>,
  triggers: Vec<GraphNode>,
}

struct GraphInner {
  id: String,
  /// Node id -> node.
  nodes: Mutex<HashMap<String, GraphNode>>,
  /// Node name -> node. Names are unique within the graph.
  names: Mutex<HashMap<String, GraphNode>>,
  classified: Mutex<Option<Arc<Classified>>>,
}

/// Container of nodes and dependency edges for one workflow.
///
/// Cloning is cheap and clones observe the same graph. Construction-phase
/// mutation is single-writer by contract; once a scheduler starts walking
/// the graph it is treated as immutable.
#[derive(Clone)]
pub struct Graph {
  inner: Arc<GraphInner>,
}

impl Graph {
  /// Creates an empty graph with the given id.
  pub fn new(id: impl Into<String>) -> Self {
    Graph {
      inner: Arc::new(GraphInner {
        id: id.into(),
        nodes: Mutex::new(HashMap::new()),
        names: Mutex::new(HashMap::new()),
        classified: Mutex::new(None),
      }),
    }
  }

  pub fn id(&self) -> &str {
    &self.inner.id
  }

  /// Whether `other` is a handle to this same graph instance.
  pub(crate) fn same_graph(&self, other: &Graph) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Weak handle for node back-references, so a graph and its nodes never
  /// keep each other alive.
  pub(crate) fn downgrade(&self) -> WeakGraph {
    WeakGraph(Arc::downgrade(&self.inner))
  }

  /// Allocates a fresh node id.
  pub(crate) fn new_node_id(&self) -> String {
    Uuid::new_v4().to_string()
  }

  /// Registers `node`, adopting it into this graph if it is unbound, and
  /// returns its id. Idempotent on id. Errors if the node belongs to a
  /// different graph or its name is taken by a different node.
  pub fn add(&self, node: &GraphNode) -> Result<String> {
    if let Some(owner) = node.graph() {
      if !self.same_graph(&owner) {
        return Err(GraphError::CrossGraphConflict {
          left: self.id().to_string(),
          right: owner.id().to_string(),
        });
      }
    }
    let id = node.bind(self);

    let mut nodes = self.inner.nodes.lock().unwrap();
    if nodes.contains_key(&id) {
      return Ok(id);
    }
    if let Some(name) = node.name() {
      let mut names = self.inner.names.lock().unwrap();
      match names.get(name) {
        Some(existing) if existing != node => {
          return Err(GraphError::NamingConflict {
            name: name.to_string(),
            graph: self.id().to_string(),
          });
        }
        Some(_) => {}
        None => {
          names.insert(name.to_string(), node.clone());
        }
      }
    }
    nodes.insert(id.clone(), node.clone());
    drop(nodes);
    trace!(graph = %self.id(), node = %id, "node registered");

    *self.inner.classified.lock().unwrap() = None;
    Ok(id)
  }

  /// Registered nodes. Order is not specified; the structural queries are
  /// the sorted surface.
  pub fn nodes(&self) -> Vec<GraphNode> {
    self.inner.nodes.lock().unwrap().values().cloned().collect()
  }

  /// Ids of all registered nodes.
  pub fn node_ids(&self) -> Vec<String> {
    self.inner.nodes.lock().unwrap().keys().cloned().collect()
  }

  /// Node registered under `id`.
  pub fn node(&self, id: &str) -> Option<GraphNode> {
    self.inner.nodes.lock().unwrap().get(id).cloned()
  }

  /// Node registered under `name`.
  pub fn node_by_name(&self, name: &str) -> Option<GraphNode> {
    self.inner.names.lock().unwrap().get(name).cloned()
  }

  /// Name -> id table, the basis for a run context.
  pub fn name_to_id(&self) -> HashMap<String, String> {
    let names = self.inner.names.lock().unwrap();
    names
      .iter()
      .filter_map(|(name, node)| node.id().map(|id| (name.clone(), id)))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.inner.nodes.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.nodes.lock().unwrap().is_empty()
  }

  /// Enters this graph as the current construction scope.
  ///
  /// Nodes built while the returned guard is alive auto-bind to this graph.
  /// Dropping the guard pops the scope, on every exit path including
  /// unwinding.
  pub fn enter(&self) -> ScopeGuard {
    scope::enter(self.clone());
    ScopeGuard {
      _not_send: PhantomData,
    }
  }

  /// Nodes with no upstream dependency, sorted by id.
  #[instrument(level = "trace", skip(self), fields(graph = %self.id()))]
  pub fn root_nodes(&self) -> Result<Vec<GraphNode>> {
    Ok(self.classify()?.roots.clone())
  }

  /// Nodes with no downstream dependent, sorted by id.
  #[instrument(level = "trace", skip(self), fields(graph = %self.id()))]
  pub fn leaf_nodes(&self) -> Result<Vec<GraphNode>> {
    Ok(self.classify()?.leaves.clone())
  }

  /// Nodes whose operator is an external entry point, sorted by id.
  #[instrument(level = "trace", skip(self), fields(graph = %self.id()))]
  pub fn trigger_nodes(&self) -> Result<Vec<GraphNode>> {
    Ok(self.classify()?.triggers.clone())
  }

  /// Expands the registered nodes through both edge directions, rejects
  /// cycles and caches the root/leaf/trigger sets.
  fn classify(&self) -> Result<Arc<Classified>> {
    if let Some(cached) = self.inner.classified.lock().unwrap().clone() {
      return Ok(cached);
    }

    // Wiring may attach nodes that were never explicitly registered;
    // membership is registration plus transitive discovery.
    let mut by_id: HashMap<String, GraphNode> = HashMap::new();
    let mut queue: VecDeque<GraphNode> = self.nodes().into();
    while let Some(node) = queue.pop_front() {
      let Some(id) = node.id() else {
        continue;
      };
      if by_id.contains_key(&id) {
        continue;
      }
      queue.extend(node.upstream());
      queue.extend(node.downstream());
      by_id.insert(id, node);
    }

    // Kahn's algorithm over the discovered set; leftover nodes mean a cycle.
    let mut indegree: HashMap<String, usize> = by_id
      .iter()
      .map(|(id, node)| (id.clone(), node.upstream().len()))
      .collect();
    let mut ready: VecDeque<String> = indegree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(id, _)| id.clone())
      .collect();
    let mut visited = 0usize;
    while let Some(id) = ready.pop_front() {
      visited += 1;
      for down in by_id[&id].downstream() {
        let Some(down_id) = down.id() else {
          continue;
        };
        if let Some(degree) = indegree.get_mut(&down_id) {
          *degree -= 1;
          if *degree == 0 {
            ready.push_back(down_id);
          }
        }
      }
    }
    if visited != by_id.len() {
      return Err(GraphError::CycleDetected {
        graph: self.id().to_string(),
      });
    }

    let mut ids: Vec<&String> = by_id.keys().collect();
    ids.sort();
    let mut roots = Vec::new();
    let mut leaves = Vec::new();
    let mut triggers = Vec::new();
    for id in ids {
      let node = &by_id[id];
      if node.upstream().is_empty() {
        roots.push(node.clone());
      }
      if node.downstream().is_empty() {
        leaves.push(node.clone());
      }
      if node.operator().is_trigger() {
        triggers.push(node.clone());
      }
    }
    trace!(
      graph = %self.id(),
      nodes = by_id.len(),
      roots = roots.len(),
      leaves = leaves.len(),
      triggers = triggers.len(),
      "classification rebuilt"
    );

    let classified = Arc::new(Classified {
      roots,
      leaves,
      triggers,
    });
    *self.inner.classified.lock().unwrap() = Some(classified.clone());
    Ok(classified)
  }

  /// Runs every registered node's after-run hook concurrently and waits for
  /// all of them; the graph is finished for this run afterwards.
  ///
  /// Every hook is attempted even when earlier ones fail; failures are
  /// collected and reported together.
  pub async fn finish(&self) -> Result<()> {
    let nodes = self.nodes();
    info!(graph = %self.id(), nodes = nodes.len(), "running after-run hooks");
    let hooks = nodes.iter().map(|node| async move {
      let outcome = node.operator().after_run().await;
      (node, outcome)
    });
    let mut failures = Vec::new();
    for (node, outcome) in join_all(hooks).await {
      if let Err(err) = outcome {
        failures.push(HookFailure {
          node_id: node.id().unwrap_or_default(),
          message: err.to_string(),
        });
      }
    }
    if failures.is_empty() {
      Ok(())
    } else {
      Err(GraphError::AfterRunFailed { failures })
    }
  }
}

impl PartialEq for Graph {
  fn eq(&self, other: &Self) -> bool {
    self.same_graph(other)
  }
}

impl Eq for Graph {}

impl fmt::Debug for Graph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Graph")
      .field("id", &self.inner.id)
      .field("nodes", &self.len())
      .finish()
  }
}

/// Weak counterpart of [Graph], held by nodes as their owner back-reference.
#[derive(Clone)]
pub(crate) struct WeakGraph(Weak<GraphInner>);

impl WeakGraph {
  pub(crate) fn upgrade(&self) -> Option<Graph> {
    self.0.upgrade().map(|inner| Graph { inner })
  }
}

/// RAII guard for a graph construction scope; see [Graph::enter].
///
/// Not sendable: the scope must be exited on the thread or task that
/// entered it.
pub struct ScopeGuard {
  _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
  fn drop(&mut self) {
    scope::exit();
  }
}
