// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the manager runtime: requests go in through the
//! broker, answers come back on reply queues, and the reconciliation
//! loop keeps the pool serving through failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use portico_backend::{
    BackendState, ConnectionConfig, ExchangeDir, MemoryJournal, MockBackend, RequestState,
};
use portico_manager::consumer::ConsumerState;
use portico_manager::manager::ManagerSettings;
use portico_manager::runtime::{ManagerHandle, ManagerRuntime};
use portico_protocol::rpc::{ERROR_INVALID_REQUEST, ERROR_TIMEOUT, ERROR_UNKNOWN_METHOD};
use portico_protocol::{ManagerState, RpcRequest, RpcResponse};
use portico_queue::{InMemoryBroker, Publication, QueueTransport};
use portico_schema::SchemaModel;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, timeout};

const QUEUE: &str = "portico.requests";

static CALL_SEQ: AtomicU64 = AtomicU64::new(0);

fn test_model() -> Arc<SchemaModel> {
    Arc::new(
        SchemaModel::from_value(json!({
            "methods": {
                "ping": {"object": "EchoService"},
                "create_order": {
                    "object": "OrderService",
                    "input": [
                        {"name": "qty", "kind": "integer", "setter": "set_qty", "mandatory": true}
                    ],
                    "output": [
                        {"name": "qty", "kind": "integer", "getter": "get_qty"}
                    ]
                }
            },
            "enums": {}
        }))
        .unwrap(),
    )
}

struct Stack {
    broker: InMemoryBroker,
    backend: MockBackend,
    handle: ManagerHandle,
    _exchange: tempfile::TempDir,
}

fn fast_settings(workers: u32) -> ManagerSettings {
    ManagerSettings {
        initial_workers: workers,
        reconcile_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn start_stack(backend: MockBackend, settings: ManagerSettings) -> Stack {
    let broker = InMemoryBroker::new();
    let exchange = tempfile::tempdir().unwrap();
    let handle = ManagerRuntime::new(
        settings,
        Arc::new(broker.clone()),
        Arc::new(backend.clone()),
        test_model(),
        ExchangeDir::new(exchange.path()),
    )
    .journal(Arc::new(MemoryJournal::new()))
    .start()
    .await;
    Stack {
        broker,
        backend,
        handle,
        _exchange: exchange,
    }
}

async fn wait_until_serving(handle: &ManagerHandle, workers: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = handle.manager().status().await;
        if status.workers.len() == workers
            && status.workers.iter().all(|w| {
                w.consumer.state == ConsumerState::Running
                    && w.backend.state == BackendState::Ready
            })
        {
            return;
        }
        assert!(Instant::now() < deadline, "pool never became ready");
        sleep(Duration::from_millis(10)).await;
    }
}

/// Publish a request and wait for its reply on a dedicated reply queue.
async fn rpc_call(broker: InMemoryBroker, method: &str, params: Value, id: Value) -> RpcResponse {
    let seq = CALL_SEQ.fetch_add(1, Ordering::Relaxed);
    let reply_queue = format!("test.replies.{seq}");
    let correlation = format!("corr-{seq}");
    let body = serde_json::to_vec(&RpcRequest::new(method, params, id)).unwrap();
    broker.send(
        QUEUE,
        Publication::new(body)
            .method(method)
            .reply_to(&reply_queue, &correlation),
    );

    let mut replies = broker.open(&reply_queue).await.unwrap();
    let delivery = timeout(Duration::from_secs(5), replies.next_delivery())
        .await
        .expect("no reply within deadline")
        .unwrap()
        .expect("reply queue closed");
    assert_eq!(delivery.correlation_id.as_deref(), Some(correlation.as_str()));
    serde_json::from_slice(&delivery.body).unwrap()
}

#[tokio::test]
async fn test_rpc_round_trip_through_pool() {
    let stack = start_stack(MockBackend::new(), fast_settings(2)).await;
    wait_until_serving(&stack.handle, 2).await;

    let response = rpc_call(
        stack.broker.clone(),
        "create_order",
        json!({"qty": 7}),
        json!("req-1"),
    )
    .await;
    assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
    assert_eq!(response.result, json!({"qty": 7}));
    assert_eq!(response.id, json!("req-1"));

    let response = rpc_call(stack.broker.clone(), "ping", json!({}), json!(2)).await;
    assert!(response.error.is_none());
    assert_eq!(stack.broker.depth(QUEUE), 0);

    let state = stack.handle.shutdown(Duration::from_secs(5)).await;
    assert_eq!(state, ManagerState::UserStop);
    assert_eq!(stack.backend.logoff_count(), 2);
}

#[tokio::test]
async fn test_caller_errors_are_answered() {
    let stack = start_stack(MockBackend::new(), fast_settings(1)).await;
    wait_until_serving(&stack.handle, 1).await;

    let response = rpc_call(stack.broker.clone(), "frobnicate", json!({}), json!(1)).await;
    let error = response.error.expect("expected unknown-method error");
    assert_eq!(error.code, Some(ERROR_UNKNOWN_METHOD));

    let response = rpc_call(stack.broker.clone(), "create_order", json!({}), json!(2)).await;
    let error = response.error.expect("expected marshalling error");
    assert!(error.message.contains("missing mandatory field: qty"));
    assert_eq!(response.result, Value::Null);

    // A body that is not JSON at all still gets a structured answer
    stack.broker.send(
        QUEUE,
        Publication::new(&b"definitely not json"[..]).reply_to("test.replies.raw", "corr-raw"),
    );
    let mut replies = stack.broker.open("test.replies.raw").await.unwrap();
    let delivery = timeout(Duration::from_secs(5), replies.next_delivery())
        .await
        .expect("no reply within deadline")
        .unwrap()
        .unwrap();
    let response: RpcResponse = serde_json::from_slice(&delivery.body).unwrap();
    let error = response.error.expect("expected invalid-request error");
    assert_eq!(error.code, Some(ERROR_INVALID_REQUEST));
    assert_eq!(response.id, Value::Null);

    // None of it disturbed the session
    let response = rpc_call(stack.broker.clone(), "ping", json!({}), json!(3)).await;
    assert!(response.error.is_none());
    assert_eq!(stack.broker.depth(QUEUE), 0);

    stack.handle.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_requests_spread_across_workers() {
    let stack = start_stack(MockBackend::new(), fast_settings(2)).await;
    wait_until_serving(&stack.handle, 2).await;

    let mut calls = JoinSet::new();
    for i in 1..=8i64 {
        let broker = stack.broker.clone();
        calls.spawn(async move {
            let response =
                rpc_call(broker, "create_order", json!({"qty": i}), json!(i)).await;
            (i, response)
        });
    }
    while let Some(result) = calls.join_next().await {
        let (i, response) = result.unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.result, json!({"qty": i}));
    }

    let status = stack.handle.manager().status().await;
    let processed: u64 = status.workers.iter().map(|w| w.counters.processed).sum();
    assert_eq!(processed, 8);

    stack.handle.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_timeout_recovery_end_to_end() {
    let settings = ManagerSettings {
        connection: ConnectionConfig {
            request_deadline: Duration::from_millis(10),
            ..Default::default()
        },
        ..fast_settings(1)
    };
    // Every backend call takes 40ms: executes overrun their 10ms window
    // while login and logoff stay comfortably inside theirs
    let stack = start_stack(MockBackend::with_call_delay(Duration::from_millis(40)), settings).await;
    wait_until_serving(&stack.handle, 1).await;

    let response = rpc_call(
        stack.broker.clone(),
        "create_order",
        json!({"qty": 7}),
        json!(1),
    )
    .await;
    let error = response.error.expect("expected timeout error");
    assert_eq!(error.code, Some(ERROR_TIMEOUT));
    assert_eq!(error.message, "Server timed out");

    // The loop must join the fenced call, recycle the session and lift
    // the force-pause on its own
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = stack.handle.manager().status().await;
        let worker = &status.workers[0];
        if worker.consumer.state == ConsumerState::Running
            && worker.backend.state == BackendState::Ready
            && worker.backend.request == RequestState::WaitingForRequest
            && !worker.backend.request_timed_out
        {
            assert_eq!(worker.counters.timeouts, 1);
            break;
        }
        assert!(Instant::now() < deadline, "pool never recovered from timeout");
        sleep(Duration::from_millis(10)).await;
    }
    assert!(stack.backend.login_count() >= 2);
    assert!(stack.backend.logoff_count() >= 1);

    stack.handle.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_pool_corruption_exits() {
    let stack = start_stack(MockBackend::new(), fast_settings(2)).await;
    wait_until_serving(&stack.handle, 2).await;

    stack.backend.poison();
    for i in 0..2 {
        stack.broker.send(
            QUEUE,
            Publication::new(
                serde_json::to_vec(&RpcRequest::new("ping", json!({}), json!(i))).unwrap(),
            ),
        );
    }

    let state = timeout(Duration::from_secs(5), stack.handle.wait())
        .await
        .expect("manager never exited");
    assert_eq!(state, ManagerState::ErrorStop);
    assert_eq!(
        stack.handle.manager().exit_reason(),
        "all backend connections corrupted"
    );

    let final_state = stack.handle.shutdown(Duration::from_millis(500)).await;
    assert_eq!(final_state, ManagerState::ErrorStop);
}
