//! End-to-end: build a graph under a scope, classify it, drive one run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use taskweave::{
  Graph, GraphError, GraphNode, HookError, Operator, RunContext, TaskContext, TaskValue, scope,
};

/// Entry point receiving external input.
struct HttpEntry;

impl Operator for HttpEntry {
  fn is_trigger(&self) -> bool {
    true
  }
}

/// Worker whose after-run hook flushes state, possibly failing.
struct Transform {
  cleanups: Arc<AtomicUsize>,
  fail_cleanup: bool,
}

#[async_trait]
impl Operator for Transform {
  async fn after_run(&self) -> Result<(), HookError> {
    self.cleanups.fetch_add(1, Ordering::SeqCst);
    if self.fail_cleanup {
      Err("flush failed".into())
    } else {
      Ok(())
    }
  }
}

#[tokio::test]
async fn pipeline_builds_classifies_and_runs() {
  let cleanups = Arc::new(AtomicUsize::new(0));
  let graph = Graph::new("request-pipeline");

  let build_graph = graph.clone();
  let build_cleanups = cleanups.clone();
  scope::task_scoped(async move {
    let _guard = build_graph.enter();
    let entry = GraphNode::builder(Arc::new(HttpEntry))
      .id("entry")
      .name("entry")
      .build();
    let map = GraphNode::builder(Arc::new(Transform {
      cleanups: build_cleanups.clone(),
      fail_cleanup: false,
    }))
    .id("map")
    .name("map")
    .build();
    let join = GraphNode::builder(Arc::new(Transform {
      cleanups: build_cleanups,
      fail_cleanup: false,
    }))
    .id("join")
    .name("join")
    .build();
    entry.pipe_to(&map).unwrap().pipe_to(&join).unwrap();
  })
  .await;

  // structural view a scheduler would take
  let ids = |nodes: Vec<GraphNode>| -> Vec<String> {
    nodes.iter().filter_map(|n| n.id()).collect()
  };
  assert_eq!(ids(graph.root_nodes().unwrap()), vec!["entry"]);
  assert_eq!(ids(graph.leaf_nodes().unwrap()), vec!["join"]);
  assert_eq!(ids(graph.trigger_nodes().unwrap()), vec!["entry"]);

  // one run: outputs recorded top-down, shared data exchanged out of band
  let run = RunContext::for_graph(&graph, false);

  run.set_current_task(TaskContext::named("entry", "entry"));
  run.record_output("entry", Arc::new("payload".to_string()) as TaskValue);
  run
    .put_task_shared("entry", "received-at", Arc::new(7u64) as TaskValue, false)
    .await
    .unwrap();

  run.set_current_task(TaskContext::named("map", "map"));
  let upstream = run.output_for("entry").unwrap();
  let payload = upstream.downcast_ref::<String>().unwrap().clone();
  run.record_output("map", Arc::new(payload.to_uppercase()) as TaskValue);

  run.set_current_task(TaskContext::named("join", "join"));
  let mapped = run.output_for("map").unwrap();
  assert_eq!(mapped.downcast_ref::<String>().unwrap(), "PAYLOAD");
  let stamp = run
    .get_task_shared("entry", "received-at")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(stamp.downcast_ref::<u64>(), Some(&7));

  graph.finish().await.unwrap();
  assert_eq!(cleanups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_cleanup_still_runs_the_others() {
  let cleanups = Arc::new(AtomicUsize::new(0));
  let graph = Graph::new("pipeline");
  let a = GraphNode::builder(Arc::new(Transform {
    cleanups: cleanups.clone(),
    fail_cleanup: false,
  }))
  .graph(&graph)
  .id("a")
  .build();
  let b = GraphNode::builder(Arc::new(Transform {
    cleanups: cleanups.clone(),
    fail_cleanup: true,
  }))
  .graph(&graph)
  .id("b")
  .build();
  let c = GraphNode::builder(Arc::new(Transform {
    cleanups: cleanups.clone(),
    fail_cleanup: false,
  }))
  .graph(&graph)
  .id("c")
  .build();
  a.pipe_to(&b).unwrap().pipe_to(&c).unwrap();

  let err = graph.finish().await.unwrap_err();
  assert_eq!(cleanups.load(Ordering::SeqCst), 3);
  match err {
    GraphError::AfterRunFailed { failures } => {
      assert_eq!(failures.len(), 1);
      assert_eq!(failures[0].node_id, "b");
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[test]
fn concurrent_thread_constructions_stay_isolated() {
  let handles: Vec<_> = ["g1", "g2"]
    .into_iter()
    .map(|id| {
      std::thread::spawn(move || {
        let graph = Graph::new(id);
        let _guard = graph.enter();
        let entry = GraphNode::builder(Arc::new(HttpEntry))
          .id("entry")
          .name("entry")
          .build();
        let work = GraphNode::builder(Arc::new(HttpEntry)).id("work").build();
        entry.pipe_to(&work).unwrap();
        assert_eq!(graph.len(), 2);
        graph
      })
    })
    .collect();
  // the same node name in two different graphs is allowed
  for handle in handles {
    let graph = handle.join().unwrap();
    assert_eq!(graph.root_nodes().unwrap().len(), 1);
  }
}
