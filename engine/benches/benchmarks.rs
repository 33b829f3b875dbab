//! Performance benchmarks for mirror-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mirror_engine::{
    resolve, Binding, BindingRegistry, ChildChange, MirrorAction, MirrorState, OrderedCollection,
    PathSpec, SubscriptionPlan,
};
use serde_json::json;

fn populated(size: usize) -> OrderedCollection {
    let mut list = OrderedCollection::new();
    let mut previous: Option<String> = None;
    for i in 0..size {
        let key = format!("key_{:06}", i);
        list.insert(key.clone(), json!({"n": i}), previous.as_deref());
        previous = Some(key);
    }
    list
}

fn bench_collection_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordered_collection");

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("insert_tail", size), &size, |b, &size| {
            b.iter(|| populated(black_box(size)))
        });

        group.bench_with_input(BenchmarkId::new("move_tail_to_head", size), &size, |b, &size| {
            let mut list = populated(size);
            let last = format!("key_{:06}", size - 1);
            let first = format!("key_{:06}", 0);
            b.iter(|| {
                list.move_after(black_box(&last), None);
                list.move_after(black_box(&last), Some(&first));
            })
        });

        group.bench_with_input(BenchmarkId::new("update_middle", size), &size, |b, &size| {
            let mut list = populated(size);
            let key = format!("key_{:06}", size / 2);
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                list.update(black_box(&key), json!({"n": n}))
            })
        });
    }

    group.finish();
}

fn bench_mirror_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("mirror_apply");

    group.bench_function("child_added_burst_500", |b| {
        b.iter(|| {
            let mut state = MirrorState::new(["items"]);
            state.apply(MirrorAction::ArrayUpdated {
                binding: "items".into(),
                key: "items".into(),
                items: vec![],
            });
            let mut previous: Option<String> = None;
            for i in 0..500 {
                let key = format!("k{}", i);
                state.apply(MirrorAction::from_child_change(
                    "items",
                    ChildChange::Added {
                        key: key.clone(),
                        value: json!(i),
                        previous_key: previous.take(),
                    },
                ));
                previous = Some(key);
            }
            state
        })
    });

    group.finish();
}

struct App {
    room: u32,
}

fn bench_resolve_and_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_diff");

    let mut registry = BindingRegistry::new();
    for i in 0..50 {
        let binding = if i % 2 == 0 {
            Binding::new(format!("static_{}", i), format!("data/{}", i))
        } else {
            Binding::array(
                format!("room_{}", i),
                PathSpec::computed(move |app: &App| Some(format!("rooms/{}/{}", app.room, i))),
            )
        };
        let _ = registry.add(binding);
    }

    let before = resolve(&registry, &App { room: 1 });

    group.bench_function("resolve_50", |b| {
        b.iter(|| resolve(black_box(&registry), &App { room: 1 }))
    });

    group.bench_function("diff_unchanged_50", |b| {
        let next = resolve(&registry, &App { room: 1 });
        b.iter(|| SubscriptionPlan::diff(black_box(&before), black_box(&next)))
    });

    group.bench_function("diff_half_changed_50", |b| {
        let next = resolve(&registry, &App { room: 2 });
        b.iter(|| SubscriptionPlan::diff(black_box(&before), black_box(&next)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_collection_operations,
    bench_mirror_apply,
    bench_resolve_and_diff
);
criterion_main!(benches);
