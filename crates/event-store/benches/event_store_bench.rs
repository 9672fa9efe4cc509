use common::CorrelationId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventId, EventStore, InMemoryEventStore, Version,
};
use uuid::Uuid;

fn make_event(aggregate_id: &AggregateId, version: i64) -> EventEnvelope {
    EventEnvelope::record(aggregate_id.clone(), "Inventory", Version::new(version))
        .correlation_id(CorrelationId::from_uuid(Uuid::from_u128(1)))
        .payload_raw("ProductShipped", serde_json::json!({
            "type": "ProductShipped",
            "data": {
                "correlation_id": "00000000-0000-0000-0000-000000000001",
                "user_id": 9,
                "tx_id": version
            }
        }))
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let inventory = AggregateId::new("inventory");

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .append(vec![make_event(&inventory, 1)], AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let inventory = AggregateId::new("inventory");

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let events: Vec<EventEnvelope> =
                    (1..=10).map(|v| make_event(&inventory, v)).collect();
                store.append(events, AppendOptions::unchecked()).await.unwrap();
            });
        });
    });
}

fn bench_load_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let inventory = AggregateId::new("inventory");

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(&inventory, v)).collect();
        store.append(events, AppendOptions::unchecked()).await.unwrap();
    });

    c.bench_function("event_store/load_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load(&inventory).await.unwrap();
            });
        });
    });
}

fn bench_drain_outbox(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let payment = AggregateId::new("payment");

    c.bench_function("event_store/drain_outbox_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let events: Vec<EventEnvelope> =
                    (1..=100).map(|v| make_event(&payment, v)).collect();
                store.append(events, AppendOptions::unchecked()).await.unwrap();

                let pending = store.pending_outbox(&payment).await.unwrap();
                let ids: Vec<EventId> = pending.iter().map(|e| e.event_id).collect();
                store.acknowledge(&ids).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_batch_10,
    bench_load_100,
    bench_drain_outbox,
);
criterion_main!(benches);
