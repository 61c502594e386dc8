use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use lineage_core::{CancellationToken, EventId, ExpectedVersion, StreamId};
use lineage_infra::command_dispatcher::CommandDispatcher;
use lineage_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use lineage_infra::projections::{replay, RecordProjector, ReplayOptions};
use lineage_infra::read_model::InMemoryReadModelStore;
use lineage_records::{EntityKind, FieldChanges, RecordEvent};
use std::sync::Arc;

fn notes_event(i: usize) -> UncommittedEvent {
    let event = RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("notes", format!("note {i}")));
    UncommittedEvent::from_record(EventId::new(), Utc::now(), &event).unwrap()
}

fn created_event(name: &str) -> UncommittedEvent {
    let event = RecordEvent::created(EntityKind::Person, FieldChanges::new().with("name", name));
    UncommittedEvent::from_record(EventId::new(), Utc::now(), &event).unwrap()
}

/// A log of `people` streams, each with one creation and `updates` edits.
fn seeded_store(people: usize, updates: usize) -> InMemoryEventStore {
    let store = InMemoryEventStore::new();
    let cancel = CancellationToken::new();
    for p in 0..people {
        let mut batch = vec![created_event(&format!("P{p}"))];
        batch.extend((0..updates).map(notes_event));
        store
            .append(
                &StreamId::new(format!("person-{p}")).unwrap(),
                "person",
                batch,
                ExpectedVersion::Exact(0),
                &cancel,
            )
            .unwrap();
    }
    store
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");

    // Append + synchronous projection of one update on an existing record.
    group.bench_function("update_with_projection", |b| {
        let models = Arc::new(InMemoryReadModelStore::new());
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), RecordProjector::new(models));
        let id = StreamId::new("person-1").unwrap();
        let cancel = CancellationToken::new();
        dispatcher
            .execute(&id, "person", vec![created_event("John")], ExpectedVersion::Exact(0), &cancel)
            .unwrap();

        let mut i = 0;
        b.iter(|| {
            i += 1;
            black_box(
                dispatcher
                    .execute(&id, "person", vec![notes_event(i)], ExpectedVersion::Any, &cancel)
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_append", batch_size),
            batch_size,
            |b, &size| {
                let store = InMemoryEventStore::new();
                let id = StreamId::new("person-1").unwrap();
                let cancel = CancellationToken::new();

                b.iter(|| {
                    let events: Vec<UncommittedEvent> = (0..size).map(notes_event).collect();
                    black_box(
                        store
                            .append(&id, "person", events, ExpectedVersion::Any, &cancel)
                            .unwrap(),
                    );
                });
            },
        );
    }

    group.finish();
}

fn bench_read_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_all");
    let store = seeded_store(100, 99);
    let cancel = CancellationToken::new();

    for page_size in [50, 500, 1000].iter() {
        group.throughput(Throughput::Elements(*page_size as u64));
        group.bench_with_input(BenchmarkId::new("page", page_size), page_size, |b, &size| {
            b.iter(|| black_box(store.read_all(black_box(5_000), size, &cancel).unwrap()));
        });
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for event_count in [10, 100, 1000, 10000].iter() {
        // Ten streams, events spread evenly.
        let store = seeded_store(10, event_count / 10 - 1);
        group.throughput(Throughput::Elements(*event_count as u64));
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_events", event_count),
            &store,
            |b, store| {
                let projector = RecordProjector::new(Arc::new(InMemoryReadModelStore::new()));
                let cancel = CancellationToken::new();
                b.iter(|| {
                    black_box(replay(store, &projector, ReplayOptions::full(), &cancel).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_read_all,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
