//! 工作流集成测试：子图删除传播、模型失败回滚、根图退出剪枝

use std::sync::Arc;
use std::time::Duration;

use echq::core::AgentError;
use echq::delivery::CollectingSink;
use echq::llm::{CompletionOptions, MockLlmClient};
use echq::memory::{CacheCostModel, Message, Role, TokenBudget};
use echq::session::{InboundEvent, SessionRegistry, SessionState};
use echq::workflow::{CallLlmNode, GraphBuilder, NodeStep, WorkflowEngine};

#[tokio::test]
async fn test_subgraph_marks_applied_after_full_turn() {
    let inner = GraphBuilder::new("C_graph")
        .leaf_fn("C", |ctx| {
            ctx.mark_for_deletion("m1");
            Ok(NodeStep::Continue)
        })
        .entry("C")
        .build()
        .unwrap();
    let graph = GraphBuilder::new("root")
        .leaf_fn("A", |_| Ok(NodeStep::Continue))
        .subgraph("B", inner)
        .entry("A")
        .edge("A", "B")
        .end("B")
        .build()
        .unwrap();

    let mut state = SessionState::new("c1");
    state.append(Message::with_id("m1", Role::User, "forget me", 4)).unwrap();
    state.append(Message::with_id("m2", Role::User, "keep me", 3)).unwrap();

    let outcome = WorkflowEngine::default()
        .run(&graph, &mut state, &InboundEvent::user("c1", "go"), &CollectingSink::new())
        .await
        .unwrap();

    assert_eq!(outcome.deleted, vec!["m1".to_string()]);
    assert!(!state.ledger().contains("m1"));
    assert!(state.pending_deletions().is_empty());
    assert_eq!(state.ledger().current_usage(), 3);
}

#[tokio::test]
async fn test_deletions_from_two_levels_deep_reach_root_exit() {
    let innermost = GraphBuilder::new("D_graph")
        .leaf_fn("D", |ctx| {
            ctx.mark_for_deletion("m1");
            Ok(NodeStep::Continue)
        })
        .entry("D")
        .build()
        .unwrap();
    let middle = GraphBuilder::new("C_graph")
        .subgraph("inner", innermost)
        .leaf_fn("C", |ctx| {
            assert_eq!(ctx.depth(), 1);
            assert!(ctx.deletions().contains("m1"));
            ctx.mark_for_deletion("m2");
            Ok(NodeStep::Continue)
        })
        .entry("inner")
        .edge("inner", "C")
        .build()
        .unwrap();
    let graph = GraphBuilder::new("root")
        .subgraph("B", middle)
        .leaf_fn("check", |ctx| {
            // 两层子图都已退出，根图尚未退出
            assert!(ctx.state().ledger().contains("m1"));
            assert!(ctx.state().ledger().contains("m2"));
            assert_eq!(ctx.deletions().ids(), ["m1".to_string(), "m2".to_string()]);
            Ok(NodeStep::Continue)
        })
        .entry("B")
        .edge("B", "check")
        .build()
        .unwrap();

    let mut state = SessionState::new("c1");
    state.append(Message::with_id("m1", Role::User, "first", 4)).unwrap();
    state.append(Message::with_id("m2", Role::Assistant, "second", 4)).unwrap();
    state.append(Message::with_id("m3", Role::User, "third", 4)).unwrap();

    let outcome = WorkflowEngine::default()
        .run(&graph, &mut state, &InboundEvent::user("c1", "go"), &CollectingSink::new())
        .await
        .unwrap();

    assert_eq!(outcome.visited, vec!["B", "C_graph/inner", "D_graph/D", "C_graph/C", "check"]);
    assert_eq!(outcome.deleted, vec!["m1".to_string(), "m2".to_string()]);
    let ids: Vec<&str> = state.messages().iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec!["m3"]);
    assert_eq!(state.ledger().current_usage(), 4);
}

#[tokio::test]
async fn test_model_failure_rolls_back_and_releases_lock() {
    let llm = Arc::new(MockLlmClient::new().failing_times(1).with_replies(["second try works"]));
    let graph = GraphBuilder::new("root")
        .leaf_fn("A", |_| Ok(NodeStep::Continue))
        .leaf("B", CallLlmNode::new(llm.clone(), CompletionOptions::default()))
        .entry("A")
        .edge("A", "B")
        .build()
        .unwrap();
    let registry = SessionRegistry::new(Arc::new(graph), WorkflowEngine::default())
        .with_lock_timeout(Duration::from_millis(200));

    let first = registry.run_turn(&InboundEvent::user("c1", "hello"), &CollectingSink::new()).await;
    assert!(matches!(first, Err(AgentError::ModelCallFailed(_))));
    let snapshot = registry.inspect("c1").await.unwrap().unwrap();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.current_usage, 0);

    // 失败后的会话没有被暂停，锁也已释放
    let sink = CollectingSink::new();
    let second = registry.run_turn(&InboundEvent::user("c1", "hello"), &sink).await.unwrap();
    assert_eq!(second.reply, "second try works");
    let snapshot = registry.inspect("c1").await.unwrap().unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].role(), Role::Assistant);
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_broken_stream_appends_nothing() {
    let llm = Arc::new(MockLlmClient::new().with_broken_stream().with_replies(["this reply never finishes"]));
    let graph = GraphBuilder::new("root")
        .leaf("B", CallLlmNode::new(llm, CompletionOptions::default()).streaming(true))
        .entry("B")
        .build()
        .unwrap();
    let registry = SessionRegistry::new(Arc::new(graph), WorkflowEngine::default());

    let sink = CollectingSink::new();
    let result = registry.run_turn(&InboundEvent::user("c1", "hello"), &sink).await;
    assert!(matches!(result, Err(AgentError::ModelCallFailed(_))));
    assert_eq!(sink.fragments().len(), 1);
    assert!(!sink.is_closed());
    assert!(registry.inspect("c1").await.unwrap().unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_registry_prunes_oldest_on_overflow() {
    let graph = GraphBuilder::new("root")
        .leaf_fn("noop", |_| Ok(NodeStep::Continue))
        .entry("noop")
        .build()
        .unwrap();
    let engine = WorkflowEngine::new(TokenBudget::new(100, 60).unwrap(), CacheCostModel::disabled());
    let registry = SessionRegistry::new(Arc::new(graph), engine).with_persona(Some("rules".into()));

    // 每条 20 个 ASCII 字符 => 5 tokens
    for i in 0..25 {
        let text = format!("message number {i:05}");
        assert_eq!(text.len(), 20);
        registry
            .run_turn(&InboundEvent::user("c1", text), &CollectingSink::new())
            .await
            .unwrap();
    }

    let snapshot = registry.inspect("c1").await.unwrap().unwrap();
    assert!(snapshot.current_usage <= 100);
    assert_eq!(snapshot.messages[0].id(), "system_prompt");
    let last = snapshot.messages.last().unwrap();
    assert_eq!(last.content(), "message number 00024");
    let recomputed: usize = snapshot.messages.iter().map(Message::token_cost).sum();
    assert_eq!(recomputed, snapshot.current_usage);
}

#[tokio::test]
async fn test_warm_cache_relaxes_prune_target() {
    let graph = GraphBuilder::new("root")
        .leaf_fn("touch", |ctx| {
            ctx.record_model_call(chrono::Utc::now());
            Ok(NodeStep::Continue)
        })
        .entry("touch")
        .build()
        .unwrap();
    let cache = CacheCostModel::new(true, Duration::from_secs(300), 0.5);
    let engine = WorkflowEngine::new(TokenBudget::new(100, 60).unwrap(), cache);

    let mut state = SessionState::new("c1");
    for _ in 0..20 {
        state.append(Message::new(Role::User, "x", 5)).unwrap();
    }
    // 第一轮：此前从未调用过模型，缓存视为失效
    state.append(Message::new(Role::User, "x", 5)).unwrap();
    let outcome = engine
        .run(&graph, &mut state, &InboundEvent::user("c1", "x"), &CollectingSink::new())
        .await
        .unwrap();
    assert_eq!(outcome.usage, 60);

    // 第二轮：上次调用刚刚发生，目标放宽到 60 + (100 - 60) * 0.5 = 80
    for _ in 0..9 {
        state.append(Message::new(Role::User, "x", 5)).unwrap();
    }
    let outcome = engine
        .run(&graph, &mut state, &InboundEvent::user("c1", "x"), &CollectingSink::new())
        .await
        .unwrap();
    assert_eq!(outcome.usage, 80);
}
