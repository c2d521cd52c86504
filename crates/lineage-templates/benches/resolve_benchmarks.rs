//! Template resolution benchmarks.
//!
//! Measures how resolution cost grows with chain depth, cold (records read
//! and checksum-verified from the store on every call) versus warm (records
//! held in memory after `load_all_template_files_into_memory`).
//!
//! Run with: `cargo bench --bench resolve_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use lineage_core::prelude::*;
use lineage_templates::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Stats {
    id: String,
    health: i32,
    mana: i32,
    speed: f32,
}

impl ComponentData for Stats {
    fn id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a chain of `depth` templates, each overriding one field of one of
/// eight components. Returns the store and the leaf id.
fn build_chain(depth: usize) -> (InMemoryStore, EntityId) {
    let mut io: TemplatesIo<Stats, _> =
        TemplatesIo::new(InMemoryStore::new()).with_id_generator(IdGenerator::seeded(7));

    let mut current: Entity<Stats> = Entity::new().with_pose(Pose::from_xyz(0.0, 1.0, 0.0));
    for i in 0..8 {
        current.upsert_component(Stats {
            id: format!("c{i}"),
            health: 100,
            mana: 10,
            speed: 1.0,
        });
    }
    io.save_as_template(&current).expect("save root");

    for level in 1..depth {
        let mut next = io.create_variant_instance_of(&current).expect("branch");
        if let Some(stats) = next.component_mut(&format!("c{}", level % 8)) {
            stats.health += level as i32;
        }
        io.save_as_template(&next).expect("save variant");
        current = next;
    }

    let leaf = current.id.clone();
    (io.into_store(), leaf)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_resolve_cold(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_cold");
    for depth in [1usize, 4, 16, 64] {
        let (store, leaf) = build_chain(depth);
        let config = TemplatesConfig {
            cache_reads: false,
            ..Default::default()
        };
        let mut io: TemplatesIo<Stats, _> = TemplatesIo::with_config(store, config);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &_depth| {
            b.iter(|| black_box(io.load_template_instance(&leaf).expect("resolve")));
        });
    }
    group.finish();
}

fn bench_resolve_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_warm");
    for depth in [1usize, 4, 16, 64] {
        let (store, leaf) = build_chain(depth);
        let mut io: TemplatesIo<Stats, _> = TemplatesIo::new(store);
        io.load_all_template_files_into_memory().expect("warm");
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &_depth| {
            b.iter(|| black_box(io.load_template_instance(&leaf).expect("resolve")));
        });
    }
    group.finish();
}

fn bench_save_variant(c: &mut Criterion) {
    let (store, leaf) = build_chain(16);
    let mut io: TemplatesIo<Stats, _> = TemplatesIo::new(store);
    let mut variant = io.load_template_instance(&leaf).expect("resolve");
    c.bench_function("save_variant_depth_16", |b| {
        b.iter(|| {
            if let Some(stats) = variant.component_mut("c0") {
                stats.mana += 1;
            }
            black_box(io.save_as_template(&variant).expect("save"))
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_resolve_cold, bench_resolve_warm, bench_save_variant);
criterion_main!(benches);
