//! 依赖闭包与生命周期性能基准测试
//!
//! 使用 Criterion 框架进行性能测试，包括：
//! - 分层依赖图上的闭包排序
//! - 不动点闭包
//! - 通过内存运行时激活整个工作区

use std::sync::Arc;

use chips_workspace::{
    ClosureConfig, ClosureKind, ClosurePolicy, OperationCategory, ProjectDescriptor,
    ProjectGraph, ProjectId, Scope, StaticProjectMetadata, WorkspaceConfig, WorkspaceKernel,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

// ============================================================================
// 测试辅助
// ============================================================================

/// 构造分层依赖图：每层的项目依赖上一层的所有项目
fn layered_metadata(layers: usize, width: usize) -> StaticProjectMetadata {
    let name = |layer: usize, index: usize| format!("p{}_{}", layer, index);
    let mut descriptors = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for index in 0..width {
            let mut descriptor = ProjectDescriptor::new(name(layer, index).as_str());
            if layer > 0 {
                for provider in 0..width {
                    descriptor = descriptor.requires(name(layer - 1, provider), "*");
                }
            }
            descriptors.push(descriptor);
        }
    }
    StaticProjectMetadata::new(descriptors).expect("基准元数据应合法")
}

fn top_of(layers: usize) -> Vec<ProjectId> {
    vec![ProjectId::from(format!("p{}_0", layers - 1))]
}

// ============================================================================
// 闭包排序
// ============================================================================

fn bench_closure_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("closure_sort");
    let policy = ClosurePolicy::new(ClosureConfig::default(), true).unwrap();

    for layers in [4usize, 8, 16] {
        let width = 8;
        let graph = ProjectGraph::new(Arc::new(layered_metadata(layers, width)));
        let seed = top_of(layers);
        let bottom = vec![ProjectId::from("p0_0")];
        group.throughput(Throughput::Elements((layers * width) as u64));

        group.bench_with_input(BenchmarkId::new("providing", layers), &layers, |b, _| {
            b.iter(|| {
                policy
                    .compute_closure(
                        OperationCategory::ActivateProject,
                        black_box(&graph),
                        black_box(&seed),
                        Scope::All,
                    )
                    .unwrap()
            })
        });

        group.bench_with_input(BenchmarkId::new("requiring", layers), &layers, |b, _| {
            b.iter(|| {
                policy
                    .compute_closure(
                        OperationCategory::DeactivateProject,
                        black_box(&graph),
                        black_box(&bottom),
                        Scope::Activated,
                    )
                    .unwrap()
            })
        });

        group.bench_with_input(BenchmarkId::new("partial_graph", layers), &layers, |b, _| {
            b.iter(|| {
                policy
                    .compute_with(
                        OperationCategory::DeactivateModule,
                        ClosureKind::PartialGraph,
                        black_box(&graph),
                        black_box(&bottom),
                        Scope::All,
                    )
                    .unwrap()
            })
        });
    }

    group.finish();
}

// ============================================================================
// 工作区激活
// ============================================================================

fn bench_activate_workspace(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let layers = 6;
    let width = 6;

    c.bench_function("activate_workspace", |b| {
        b.to_async(&rt).iter(|| async {
            let metadata = Arc::new(layered_metadata(layers, width));
            let (mut kernel, _runtime) =
                WorkspaceKernel::with_memory_runtime(WorkspaceConfig::default(), metadata)
                    .await
                    .unwrap();
            kernel.start().await.unwrap();
            let report = kernel.activate_projects(&top_of(layers)).await.unwrap();
            black_box(report.processed.len())
        })
    });
}

criterion_group!(benches, bench_closure_sort, bench_activate_workspace);
criterion_main!(benches);
