//! Graph vertices: operator lifecycle, identity and dependency wiring.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::trace;

use crate::env::{GraphEnv, SystemHandle};
use crate::error::{GraphError, HookError, Result};
use crate::graph::{Graph, WeakGraph};
use crate::scope;

/// Value passed between tasks during one run.
pub type TaskValue = Arc<dyn Any + Send + Sync>;

/// One unit of work attached to a graph vertex.
///
/// Implementations live in collaborating subsystems; the core only drives
/// the lifecycle hooks and reads the trigger classification. Both hooks are
/// awaited individually per node by the external scheduler.
#[async_trait]
pub trait Operator: Send + Sync {
  /// Whether this operator is an external entry point into its graph.
  fn is_trigger(&self) -> bool {
    false
  }

  /// Called before the graph run starts.
  async fn before_run(&self) -> std::result::Result<(), HookError> {
    Ok(())
  }

  /// Called after the graph run ends.
  async fn after_run(&self) -> std::result::Result<(), HookError> {
    Ok(())
  }
}

struct NodeInner {
  /// Assigned by the owning graph when the node binds without an explicit id.
  id: Mutex<Option<String>>,
  name: Option<String>,
  /// Edge lists hold node ids; handles resolve through the owning graph's
  /// registry, which keeps the vertex structure free of reference cycles.
  upstream: Mutex<Vec<String>>,
  downstream: Mutex<Vec<String>>,
  /// At most one owner; wiring unifies both sides into the same graph.
  graph: Mutex<Option<WeakGraph>>,
  operator: Arc<dyn Operator>,
  env: GraphEnv,
}

/// Shared handle to one vertex: identity, name, edge lists and graph
/// membership.
///
/// Cloning is cheap and clones observe the same vertex. Equality is by node
/// id once assigned, by handle identity before that.
#[derive(Clone)]
pub struct GraphNode {
  inner: Arc<NodeInner>,
}

impl GraphNode {
  /// Builds an unnamed node around `operator` with default configuration.
  pub fn new(operator: Arc<dyn Operator>) -> GraphNode {
    Self::builder(operator).build()
  }

  /// Starts configuring a node around `operator`.
  pub fn builder(operator: Arc<dyn Operator>) -> NodeBuilder {
    NodeBuilder {
      operator,
      graph: None,
      id: None,
      name: None,
      env: None,
    }
  }

  /// Node id, once given explicitly or assigned by a graph.
  pub fn id(&self) -> Option<String> {
    self.inner.id.lock().unwrap().clone()
  }

  /// Human-readable name, unique within the owning graph if present.
  pub fn name(&self) -> Option<&str> {
    self.inner.name.as_deref()
  }

  /// Owning graph, if bound and still alive.
  pub fn graph(&self) -> Option<Graph> {
    self
      .inner
      .graph
      .lock()
      .unwrap()
      .as_ref()
      .and_then(WeakGraph::upgrade)
  }

  /// Upstream nodes in wiring order.
  pub fn upstream(&self) -> Vec<GraphNode> {
    self.resolve_edges(&self.inner.upstream)
  }

  /// Downstream nodes in wiring order.
  pub fn downstream(&self) -> Vec<GraphNode> {
    self.resolve_edges(&self.inner.downstream)
  }

  /// The unit of work carried by this node.
  pub fn operator(&self) -> &Arc<dyn Operator> {
    &self.inner.operator
  }

  /// Shared application handle visible to this node.
  pub fn system(&self) -> Option<&SystemHandle> {
    self.inner.env.system()
  }

  /// Worker pool this node may use to offload blocking work.
  pub fn worker_pool(&self) -> Option<&tokio::runtime::Handle> {
    self.inner.env.worker_pool()
  }

  fn resolve_edges(&self, edges: &Mutex<Vec<String>>) -> Vec<GraphNode> {
    let ids: Vec<String> = edges.lock().unwrap().clone();
    match self.graph() {
      Some(graph) => ids.iter().filter_map(|id| graph.node(id)).collect(),
      None => Vec::new(),
    }
  }

  /// Adopts this node into `graph`, assigning an id if it has none.
  /// Returns the node id.
  pub(crate) fn bind(&self, graph: &Graph) -> String {
    {
      let mut owner = self.inner.graph.lock().unwrap();
      if owner.is_none() {
        *owner = Some(graph.downgrade());
      }
    }
    let mut id = self.inner.id.lock().unwrap();
    match id.as_ref() {
      Some(existing) => existing.clone(),
      None => {
        let fresh = graph.new_node_id();
        *id = Some(fresh.clone());
        fresh
      }
    }
  }

  /// Wires `nodes` as upstream dependencies of this node.
  pub fn set_upstream<N: IntoNodes>(&self, nodes: N) -> Result<()> {
    self.set_dependency(&nodes.into_nodes(), true)
  }

  /// Wires `nodes` as downstream dependents of this node.
  pub fn set_downstream<N: IntoNodes>(&self, nodes: N) -> Result<()> {
    self.set_dependency(&nodes.into_nodes(), false)
  }

  /// Wires this node upstream of `node` and returns `node`'s handle, so
  /// `a.pipe_to(&b)?.pipe_to(&c)?` builds the chain a -> b -> c.
  pub fn pipe_to(&self, node: &GraphNode) -> Result<GraphNode> {
    self.set_dependency(std::slice::from_ref(node), false)?;
    Ok(node.clone())
  }

  /// Wires `node` upstream of this node and returns `node`'s handle.
  pub fn pipe_from(&self, node: &GraphNode) -> Result<GraphNode> {
    self.set_dependency(std::slice::from_ref(node), true)?;
    Ok(node.clone())
  }

  /// Resolves the single graph shared by self and `nodes`, adopts every
  /// unbound participant into it and appends the edges, skipping any edge
  /// that already exists. A failed call performs no rollback.
  fn set_dependency(&self, nodes: &[GraphNode], is_upstream: bool) -> Result<()> {
    if nodes.is_empty() {
      return Err(GraphError::InvalidArgument(
        "at least one node is required to set a dependency".to_string(),
      ));
    }

    let mut graphs: Vec<Graph> = Vec::new();
    for node in std::iter::once(self).chain(nodes.iter()) {
      if let Some(graph) = node.graph() {
        if !graphs.iter().any(|seen| seen.same_graph(&graph)) {
          graphs.push(graph);
        }
      }
    }
    if graphs.is_empty() {
      return Err(GraphError::ScopeResolutionFailure);
    }
    if graphs.len() > 1 {
      return Err(GraphError::CrossGraphConflict {
        left: graphs[0].id().to_string(),
        right: graphs[1].id().to_string(),
      });
    }
    let graph = graphs.remove(0);

    let self_id = graph.add(self)?;
    for node in nodes {
      let node_id = graph.add(node)?;
      let (own, other) = if is_upstream {
        (&self.inner.upstream, &node.inner.downstream)
      } else {
        (&self.inner.downstream, &node.inner.upstream)
      };
      {
        let mut own = own.lock().unwrap();
        if own.iter().any(|existing| *existing == node_id) {
          continue;
        }
        own.push(node_id.clone());
      }
      other.lock().unwrap().push(self_id.clone());
      if is_upstream {
        trace!(graph = %graph.id(), from = %node_id, to = %self_id, "edge appended");
      } else {
        trace!(graph = %graph.id(), from = %self_id, to = %node_id, "edge appended");
      }
    }
    Ok(())
  }
}

impl PartialEq for GraphNode {
  fn eq(&self, other: &Self) -> bool {
    match (self.id(), other.id()) {
      (Some(a), Some(b)) => a == b,
      _ => Arc::ptr_eq(&self.inner, &other.inner),
    }
  }
}

impl Eq for GraphNode {}

impl fmt::Debug for GraphNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GraphNode")
      .field("id", &self.id())
      .field("name", &self.inner.name)
      .field("upstream", &self.inner.upstream.lock().unwrap().len())
      .field("downstream", &self.inner.downstream.lock().unwrap().len())
      .finish()
  }
}

/// Configures and builds a [GraphNode].
///
/// Binding order: the explicit graph, else the scope's current graph, else
/// the node stays unbound until wiring or [Graph::add] adopts it. A bound
/// node without an explicit id takes a fresh one from its graph.
/// Construction binds but does not register; registration happens on the
/// first [Graph::add] or wiring call.
pub struct NodeBuilder {
  operator: Arc<dyn Operator>,
  graph: Option<Graph>,
  id: Option<String>,
  name: Option<String>,
  env: Option<GraphEnv>,
}

impl NodeBuilder {
  /// Binds the node to `graph` regardless of the active scope.
  pub fn graph(mut self, graph: &Graph) -> Self {
    self.graph = Some(graph.clone());
    self
  }

  /// Uses `id` instead of a graph-assigned id.
  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  /// Names the node. Names are unique within a graph.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Overrides the runtime environment captured by the node.
  pub fn env(mut self, env: GraphEnv) -> Self {
    self.env = Some(env);
    self
  }

  pub fn build(self) -> GraphNode {
    let graph = self.graph.or_else(scope::current);
    let env = self.env.unwrap_or_default().resolve();
    let id = match (&self.id, &graph) {
      (Some(id), _) => Some(id.clone()),
      (None, Some(graph)) => Some(graph.new_node_id()),
      (None, None) => None,
    };
    GraphNode {
      inner: Arc::new(NodeInner {
        id: Mutex::new(id),
        name: self.name,
        upstream: Mutex::new(Vec::new()),
        downstream: Mutex::new(Vec::new()),
        graph: Mutex::new(graph.map(|graph| graph.downgrade())),
        operator: self.operator,
        env,
      }),
    }
  }
}

/// Argument conversion for [GraphNode::set_upstream] and
/// [GraphNode::set_downstream]: a single node, a reference, a vector, a
/// slice or an array of nodes.
pub trait IntoNodes {
  fn into_nodes(self) -> Vec<GraphNode>;
}

impl IntoNodes for GraphNode {
  fn into_nodes(self) -> Vec<GraphNode> {
    vec![self]
  }
}

impl IntoNodes for &GraphNode {
  fn into_nodes(self) -> Vec<GraphNode> {
    vec![self.clone()]
  }
}

impl IntoNodes for Vec<GraphNode> {
  fn into_nodes(self) -> Vec<GraphNode> {
    self
  }
}

impl IntoNodes for &Vec<GraphNode> {
  fn into_nodes(self) -> Vec<GraphNode> {
    self.clone()
  }
}

impl IntoNodes for &[GraphNode] {
  fn into_nodes(self) -> Vec<GraphNode> {
    self.to_vec()
  }
}

impl<const N: usize> IntoNodes for [GraphNode; N] {
  fn into_nodes(self) -> Vec<GraphNode> {
    self.into()
  }
}
