//! Inbound dispatch benchmark suite.
//!
//! Measures the hot path of a subscription: parsing a `data` frame,
//! computing operation identities, and a full server-to-callback round trip
//! over the loopback transport.
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use graphql_socket::protocol::DataResult;
use graphql_socket::transport::{LoopbackPeer, loopback};
use graphql_socket::{OperationId, ServerMessage, SubscriptionClient, Update};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use tokio::sync::{Mutex, mpsc};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const URL: &str = "ws://bench/graphql";
const QUERY: &str = "subscription { messageAdded { id text author { name } } }";
const HISTORY_LIMITS: &[usize] = &[1, 100];

fn data_frame(id: &str, n: u64) -> String {
    json!({
        "type": "data",
        "id": id,
        "payload": {"data": {"messageAdded": {"id": n, "text": "hello", "author": {"name": "bench"}}}}
    })
    .to_string()
}

// ============================================================================
// Benchmark: Frame Parsing
// ============================================================================

fn bench_parse(c: &mut Criterion) {
    let frame = data_frame("0123456789abcdef.0123456789abcdef.0", 1);

    c.bench_function("parse_data_frame", |b| {
        b.iter(|| {
            let message = ServerMessage::parse(black_box(&frame));
            if let Ok(ServerMessage::Data { payload, .. }) = message {
                black_box(DataResult::from_payload(payload));
            }
        });
    });
}

// ============================================================================
// Benchmark: Operation Identity
// ============================================================================

fn bench_operation_id(c: &mut Criterion) {
    let variables = json!({"room": "general", "limit": 50});

    c.bench_function("operation_id", |b| {
        b.iter(|| OperationId::new(black_box(URL), black_box(QUERY), black_box(&variables), 0));
    });
}

// ============================================================================
// Benchmark: Loopback Round Trip
// ============================================================================

struct Session {
    _client: SubscriptionClient,
    peer: LoopbackPeer,
    id: OperationId,
    updates: Arc<Mutex<mpsc::UnboundedReceiver<Update>>>,
}

async fn session(history_limit: usize) -> Session {
    let (factory, mut server) = loopback::pair();
    let client = SubscriptionClient::builder()
        .transport(factory)
        .history_limit(history_limit)
        .build()
        .expect("client");

    let (tx, rx) = mpsc::unbounded_channel();
    let id = client.subscribe(URL, QUERY, json!({}), 0, move |update| {
        let _ = tx.send(update);
    });

    let mut peer = server.accept().await.expect("peer");
    peer.open();
    let _init: Option<Value> = peer.recv_json().await;
    peer.send_json(&json!({"type": "connection_ack"}));
    let _start: Option<Value> = peer.recv_json().await;

    Session {
        _client: client,
        peer,
        id,
        updates: Arc::new(Mutex::new(rx)),
    }
}

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("round_trip");

    for &limit in HISTORY_LIMITS {
        let session = rt.block_on(session(limit));
        let frame = data_frame(session.id.as_str(), 7);

        group.bench_with_input(BenchmarkId::new("data", limit), &limit, |b, _| {
            b.to_async(&rt).iter(|| async {
                session.peer.send(frame.clone());
                black_box(session.updates.lock().await.recv().await);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_parse, bench_operation_id, bench_round_trip);
criterion_main!(benches);
