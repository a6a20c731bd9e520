//! Benchmarks for version selection.

use chrono::{DateTime, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reconflow::core::{ApprovalStatus, Phase, ResourceRef, ResourceSummary, ResourceType};
use reconflow::reconcile::{select, VersionSelector};

fn snapshot(size: usize) -> Vec<ResourceSummary> {
    (0..size)
        .map(|i| {
            let secs = 1_700_000_000 + i64::try_from(i % 997).unwrap_or(0) * 60;
            let created = DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now);
            let approval = if i % 3 == 0 {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::PendingManualApproval
            };
            ResourceSummary::new(
                ResourceRef::new(
                    ResourceType::ModelPackage,
                    format!("arn:aws:sagemaker:us-east-1:123456789012:model-package/g/{i}"),
                ),
                Phase::Active,
                created,
            )
            .with_approval(approval)
        })
        .collect()
}

fn resolver_benchmark(c: &mut Criterion) {
    let selector = VersionSelector::latest_approved_package("g");
    let mut group = c.benchmark_group("select_latest_approved");
    for size in [10, 100, 1000] {
        let candidates = snapshot(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &candidates, |b, candidates| {
            b.iter(|| black_box(select(black_box(candidates), &selector).first().map(|c| c.reference.clone())));
        });
    }
    group.finish();
}

criterion_group!(benches, resolver_benchmark);
criterion_main!(benches);
