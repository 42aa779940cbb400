// benches/gpu_benchmarks.rs — GPU pipeline benchmarks.
//
// Mirrors benchmarks.rs structure. Each GPU benchmark has a CPU counterpart
// in the same group for direct comparison.
//
//   cargo bench --bench gpu_benchmarks
//
// Skips everything when no hardware adapter is present.
//
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including CPU overhead (uploads, bind group
// creation, submit, poll). Shader execution is included in poll(). Sync-gap
// statistics are read back between kernels, so each SE layer of a
// coordination pass costs a full round trip; that is what the sync_gap
// group measures.
//
// Warmup matters: the first iterations pay pipeline compilation on some
// drivers, so warm_up_time is set explicitly.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use supertile::{device_count, Config, DeviceSelector, Image, SyncGap, Upscaler};

#[path = "../tests/common/mod.rs"]
#[allow(dead_code)]
mod common;

use common::{cpu_config, Mini};

// ============================================================
// Shared helpers
// ============================================================

fn ready(config: Config, mini: Mini) -> Upscaler {
    let mut up = Upscaler::new(config).expect("valid configuration");
    up.load_model(mini.model()).expect("model matches configuration");
    up.prepare().expect("prepare");
    up
}

fn gpu_config(scale: u32) -> Config {
    Config { device: DeviceSelector::Gpu(0), ..cpu_config(scale) }
}

fn no_gpu() -> bool {
    if device_count() == 0 {
        eprintln!("no hardware GPU, skipping GPU benchmarks");
        return true;
    }
    false
}

// ============================================================
// Full pipeline: CPU vs GPU
// ============================================================

fn bench_pipeline(c: &mut Criterion) {
    if no_gpu() {
        return;
    }
    let img: Image<u8> = common::pattern(256, 192, 3);

    let mut group = c.benchmark_group("pipeline");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);

    for scale in [2u32, 4] {
        let mut cpu = ready(Config { tile_size: 64, threads: 0, ..cpu_config(scale) }, Mini::new(scale));
        let mut gpu = ready(Config { tile_size: 64, ..gpu_config(scale) }, Mini::new(scale));
        group.bench_function(BenchmarkId::new("cpu_256x192", format!("{scale}x")), |b| {
            b.iter(|| cpu.process_image(&img).expect("process"))
        });
        group.bench_function(BenchmarkId::new("gpu_256x192", format!("{scale}x")), |b| {
            b.iter(|| gpu.process_image(&img).expect("process"))
        });
    }
    group.finish();
}

// ============================================================
// Sync-gap readback cost
// ============================================================

fn bench_sync_gap(c: &mut Criterion) {
    if no_gpu() {
        return;
    }
    let img: Image<u8> = common::pattern(256, 192, 3);

    let mut group = c.benchmark_group("gpu_sync_gap");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);
    for mode in [SyncGap::Off, SyncGap::Weak, SyncGap::Moderate, SyncGap::Strong] {
        let mut up = ready(Config { tile_size: 64, sync_gap: mode, ..gpu_config(2) }, Mini::new(2));
        group.bench_function(BenchmarkId::new("mini2x_256x192", format!("{mode:?}")), |b| {
            b.iter(|| up.process_image(&img).expect("process"))
        });
    }
    group.finish();
}

// ============================================================
// Setup cost: backend construction (weight upload, pipelines)
// ============================================================

fn bench_prepare(c: &mut Criterion) {
    if no_gpu() {
        return;
    }
    let model = Mini::new(2).model();

    let mut group = c.benchmark_group("gpu_prepare");
    group.sample_size(10);
    group.bench_function("mini2x", |b| {
        b.iter(|| {
            let mut up = Upscaler::new(gpu_config(2)).expect("device");
            up.load_model(model.clone()).expect("load");
            up.prepare().expect("prepare");
            up
        })
    });
    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_sync_gap, bench_prepare);
criterion_main!(benches);
