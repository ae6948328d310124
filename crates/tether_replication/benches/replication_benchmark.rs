//! # Replication Benchmark
//!
//! Cost of the two per-entity hot paths:
//! 1. `sample(now)` once per render frame
//! 2. `on_pose_sample` once per received packet
//!
//! Plus a whole-session render pass and wire decoding.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether_replication::codec;
use tether_replication::{
    EntityId, InterpolationSettings, Pose, PoseSample, Quaternion, ReplicationConfig, ReplicationState, Session, Vec3,
};

fn moving_sample(i: u32) -> PoseSample {
    let t = f64::from(i) / 30.0;
    #[allow(clippy::cast_possible_truncation)]
    let x = t as f32;
    PoseSample::new(Vec3::new(x, 0.0, -x), Quaternion::IDENTITY, t).with_velocity(Some(Vec3::new(1.0, 0.0, -1.0)))
}

/// Per-frame sampling of one entity.
fn bench_sample(c: &mut Criterion) {
    let mut state = ReplicationState::new(Pose::IDENTITY, InterpolationSettings::default());
    let _ = state.on_pose_sample(moving_sample(0), 0.0);
    let _ = state.on_pose_sample(moving_sample(1), 0.05);

    let mut now = 0.0;
    c.bench_function("replication_sample_frame", |b| {
        b.iter(|| {
            now += 1.0e-4;
            black_box(state.sample(black_box(now)))
        });
    });
}

/// Sample ingestion, accepted path.
fn bench_ingest(c: &mut Criterion) {
    let mut state = ReplicationState::new(Pose::IDENTITY, InterpolationSettings::default());
    let mut i = 0u32;
    c.bench_function("replication_ingest_sample", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(state.on_pose_sample(black_box(moving_sample(i)), 0.05))
        });
    });
}

/// Full session render pass over many entities.
fn bench_session_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_render");

    for entity_count in [100u32, 1_000, 10_000] {
        let mut session = Session::new(ReplicationConfig::default()).expect("default config is valid");
        session.connect().expect("fresh session connects");
        session.on_connected().expect("handshake completes");
        for id in 0..entity_count {
            let _ = session.spawn_remote(EntityId(id), Pose::IDENTITY);
            let _ = session.on_pose_sample(EntityId(id), moving_sample(0), 0.0);
            let _ = session.on_pose_sample(EntityId(id), moving_sample(1), 0.05);
        }

        group.throughput(Throughput::Elements(u64::from(entity_count)));
        let mut now = 0.0;
        group.bench_with_input(BenchmarkId::new("render", entity_count), &entity_count, |b, _| {
            b.iter(|| {
                now += 1.0e-4;
                let mut sum = 0.0f32;
                session.render(now, |_, pose| sum += pose.position.x);
                black_box(sum)
            });
        });
    }

    group.finish();
}

/// Wire decode plus validation.
fn bench_decode(c: &mut Criterion) {
    let bytes = codec::encode(EntityId(42), &moving_sample(7));
    c.bench_function("codec_decode", |b| {
        b.iter(|| black_box(codec::decode(black_box(&bytes), 1.0e-3)));
    });
}

criterion_group!(benches, bench_sample, bench_ingest, bench_session_render, bench_decode);
criterion_main!(benches);
