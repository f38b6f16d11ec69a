use async_trait::async_trait;
use autarch_broker::EventBroker;
use autarch_metacog::{MetacogConfig, MetacognitiveEngine};
use autarch_nodes::{NodeRegistry, NodeRegistryConfig};
use autarch_orchestrator::{Orchestrator, OrchestratorConfig, RemoteDispatcher};
use autarch_persistence::PersistenceStore;
use autarch_tools::{AnalyzeAndPatchTool, EchoTool, FederatedTrainingTool, ToolFault, ToolRegistry};
use autarch_types::ErrorKind;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

struct UnusedDispatcher;

#[async_trait]
impl RemoteDispatcher for UnusedDispatcher {
    async fn dispatch(
        &self,
        _node_id: &str,
        _tool_name: &str,
        _args: serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value, ToolFault> {
        panic!("no step in these tests declares remote dependencies")
    }
}

/// Fails whichever node is dispatched to first with a retryable fault, then
/// succeeds on every subsequent call. `choose_node` samples among equally
/// reputable candidates at random, so this deliberately doesn't pin a
/// specific node id as "the flaky one" — it records every node it was
/// asked to dispatch to so the test can assert the retry landed on a
/// *different* node than the failed first attempt.
struct FlakyDispatcher {
    attempted: Mutex<Vec<String>>,
}

#[async_trait]
impl RemoteDispatcher for FlakyDispatcher {
    async fn dispatch(
        &self,
        node_id: &str,
        _tool_name: &str,
        args: serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value, ToolFault> {
        let mut attempted = self.attempted.lock().unwrap();
        attempted.push(node_id.to_string());
        if attempted.len() == 1 {
            Err(ToolFault::new(ErrorKind::RemoteCrashed, "simulated node crash"))
        } else {
            Ok(serde_json::json!({ "patched": args.get("target").cloned() }))
        }
    }
}

fn build_orchestrator(dir: &tempfile::TempDir) -> Orchestrator {
    let broker = Arc::new(EventBroker::new(64, 1000));
    let persistence = Arc::new(PersistenceStore::open_path(dir.path().join("db"), 64).unwrap());
    let tools = Arc::new(ToolRegistry::new(broker.clone(), persistence.clone()));
    tools.register(Arc::new(EchoTool)).unwrap();
    tools.register(Arc::new(FederatedTrainingTool)).unwrap();

    let nodes = Arc::new(NodeRegistry::new(NodeRegistryConfig {
        heartbeat_timeout_seconds: 90,
        reputation_up: 0.02,
        reputation_down: 0.05,
    }));
    let metacog = Arc::new(MetacognitiveEngine::new(
        MetacogConfig {
            confidence_threshold: 0.60,
            learning_cooldown_seconds: 300,
            min_samples: 10,
            history_window: 100,
        },
        broker.clone(),
        persistence.clone(),
    ));

    Orchestrator::new(
        "echo",
        OrchestratorConfig { max_retries: 2 },
        broker,
        tools,
        nodes,
        metacog,
        Arc::new(UnusedDispatcher),
    )
}

#[tokio::test]
async fn happy_path_intent_echoes_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(&dir);
    let result = orchestrator.handle_intent("echo hello").await.unwrap();
    assert_eq!(result, serde_json::json!([{ "intent": "echo hello" }]));
}

#[tokio::test]
async fn repeated_failing_topic_eventually_schedules_learning() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(EventBroker::new(64, 1000));
    let persistence = Arc::new(PersistenceStore::open_path(dir.path().join("db"), 64).unwrap());
    let tools = Arc::new(ToolRegistry::new(broker.clone(), persistence.clone()));
    tools.register(Arc::new(FederatedTrainingTool)).unwrap();
    // "analyze_and_patch" is intentionally left unregistered so every
    // optimize-intent step fails with UnknownTool, driving confidence down.

    let nodes = Arc::new(NodeRegistry::new(NodeRegistryConfig {
        heartbeat_timeout_seconds: 90,
        reputation_up: 0.02,
        reputation_down: 0.05,
    }));
    let metacog = Arc::new(MetacognitiveEngine::new(
        MetacogConfig {
            confidence_threshold: 0.60,
            learning_cooldown_seconds: 300,
            min_samples: 10,
            history_window: 100,
        },
        broker.clone(),
        persistence.clone(),
    ));

    let orchestrator = Orchestrator::new(
        "echo",
        OrchestratorConfig { max_retries: 0 },
        broker,
        tools,
        nodes,
        metacog.clone(),
        Arc::new(UnusedDispatcher),
    );

    for _ in 0..12 {
        let _ = orchestrator.handle_intent("please optimize function hot_loop").await;
    }

    assert!(metacog.confidence("optimization") < 0.60);
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn remote_dispatch_retries_on_a_different_node_after_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(EventBroker::new(64, 1000));
    let persistence = Arc::new(PersistenceStore::open_path(dir.path().join("db"), 64).unwrap());
    let tools = Arc::new(ToolRegistry::new(broker.clone(), persistence.clone()));
    tools.register(Arc::new(AnalyzeAndPatchTool)).unwrap();

    let nodes = Arc::new(NodeRegistry::new(NodeRegistryConfig {
        heartbeat_timeout_seconds: 90,
        reputation_up: 0.02,
        reputation_down: 0.05,
    }));
    let mut capabilities = HashSet::new();
    capabilities.insert("static_analysis".to_string());
    let node_a = nodes.register("worker".to_string(), capabilities.clone(), serde_json::json!({}));
    let node_b = nodes.register("worker".to_string(), capabilities, serde_json::json!({}));
    nodes.heartbeat(&node_a, serde_json::json!({})).unwrap();
    nodes.heartbeat(&node_b, serde_json::json!({})).unwrap();

    let metacog = Arc::new(MetacognitiveEngine::new(
        MetacogConfig {
            confidence_threshold: 0.60,
            learning_cooldown_seconds: 300,
            min_samples: 10,
            history_window: 100,
        },
        broker.clone(),
        persistence.clone(),
    ));

    let dispatcher = Arc::new(FlakyDispatcher {
        attempted: Mutex::new(Vec::new()),
    });

    let orchestrator = Orchestrator::new(
        "echo",
        OrchestratorConfig { max_retries: 1 },
        broker,
        tools,
        nodes.clone(),
        metacog,
        dispatcher.clone(),
    );

    let result = orchestrator
        .handle_intent("please optimize function hot_loop")
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!([{ "patched": "hot_loop" }]));

    let attempted = dispatcher.attempted.lock().unwrap().clone();
    assert_eq!(attempted.len(), 2, "expected one failed attempt then one retry");
    assert_ne!(attempted[0], attempted[1], "retry must exclude the failed node");

    let failed_node = &attempted[0];
    let retried_node = &attempted[1];
    assert!(nodes.get(failed_node).unwrap().reputation < 0.5);
    assert!(nodes.get(retried_node).unwrap().reputation > 0.5);
}
