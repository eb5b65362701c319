//! Parsing and validation benchmarks
//!
//! Both run on every status and start request:
//! - nvidia-smi CSV parsing for device and per-process queries
//! - merging and validating partial launch parameters

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use vllm_manager::gpu::{parse_devices, parse_process_memory};
use vllm_manager::{LaunchParams, LaunchParamsInput};

fn device_csv(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "{i}, NVIDIA A100-SXM4-80GB, {}, {}, 81920, 60, 250.50, 400.00\n",
                i * 7 % 100,
                i * 1000
            )
        })
        .collect()
}

fn compute_apps_csv(count: usize) -> String {
    (0..count)
        .map(|i| format!("{}, {}\n", 10_000 + i, 512 * (i + 1)))
        .collect()
}

fn bench_gpu_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("nvidia_smi");

    for count in [1, 8, 16] {
        let csv = device_csv(count);
        group.bench_with_input(BenchmarkId::new("devices", count), &csv, |b, csv| {
            b.iter(|| parse_devices(black_box(csv)))
        });
    }

    for count in [4, 64, 512] {
        let csv = compute_apps_csv(count);
        let last_pid = 10_000 + count as u32 - 1;
        group.bench_with_input(
            BenchmarkId::new("process_memory", count),
            &csv,
            |b, csv| b.iter(|| parse_process_memory(black_box(csv), black_box(last_pid))),
        );
    }

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let defaults = LaunchParams::fallback(8000, &[0, 1]);

    let empty = LaunchParamsInput::default();
    let full = LaunchParamsInput {
        gpus: Some(vec![0, 1, 2, 3]),
        port: Some(8001),
        tensor_parallel_size: Some(4),
        gpu_memory_utilization: Some(0.85),
        max_model_len: Some(32768),
        dtype: Some("bfloat16".to_string()),
    };
    let invalid = LaunchParamsInput {
        port: Some(70000),
        ..Default::default()
    };

    let mut group = c.benchmark_group("launch_params");
    group.bench_function("resolve_defaults", |b| {
        b.iter(|| black_box(&empty).resolve(black_box(&defaults)))
    });
    group.bench_function("resolve_full", |b| {
        b.iter(|| black_box(&full).resolve(black_box(&defaults)))
    });
    group.bench_function("resolve_invalid", |b| {
        b.iter(|| black_box(&invalid).resolve(black_box(&defaults)))
    });
    group.finish();
}

criterion_group!(benches, bench_gpu_parsing, bench_validation);
criterion_main!(benches);
