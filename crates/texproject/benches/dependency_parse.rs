// dependency_parse.rs - Benchmarks for root discovery and dependency parsing
//
// Run with: cargo bench --bench dependency_parse --features test-support
// Compare baselines: cargo bench --bench dependency_parse --features test-support -- --baseline before

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use texproject::config::{ProjectConfig, StaticConfig};
use texproject::document_store::DocumentStore;
use texproject::fs::LocalFs;
use texproject::project::manager::{Collaborators, Manager};
use texproject::project::scanner::InclusionScanner;
use texproject::project::text::strip_comments_and_verbatim;
use texproject::test_utils::fixture_project::{FixtureConfig, TestProject};

fn manager_for(project: &TestProject) -> Manager {
    let collaborators = Collaborators::new(
        Arc::new(LocalFs::new()),
        Arc::new(DocumentStore::new()),
        Arc::new(StaticConfig::new(ProjectConfig::default())),
    );
    Manager::new(Some(project.root().to_path_buf()), collaborators)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Benchmark: cold root discovery plus full dependency parse
//
// Every iteration starts from an empty cache, so the cost includes workspace
// listing, candidate filtering, scanning and element extraction.
// ---------------------------------------------------------------------------

fn bench_cold_find_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_find_root");
    group.sample_size(20);
    let rt = runtime();

    let configs: &[(&str, FixtureConfig)] = &[
        ("small", FixtureConfig::small()),
        ("medium", FixtureConfig::medium()),
    ];

    for (label, config) in configs {
        let project = TestProject::generated(config).unwrap();
        group.bench_with_input(BenchmarkId::new("project", *label), &project, |b, project| {
            b.to_async(&rt).iter(|| async {
                let manager = manager_for(project);
                black_box(manager.find_root().await)
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: warm reparse
//
// Nothing changed on disk, so each iteration should only stat files and
// walk cached children.
// ---------------------------------------------------------------------------

fn bench_warm_reparse(c: &mut Criterion) {
    let mut group = c.benchmark_group("warm_reparse");
    group.sample_size(20);
    let rt = runtime();

    for (label, config) in [("medium", FixtureConfig::medium()), ("large", FixtureConfig::large())] {
        let project = TestProject::generated(&config).unwrap();
        let manager = manager_for(&project);
        let root = rt.block_on(manager.find_root()).unwrap();

        group.bench_function(BenchmarkId::new("project", label), |b| {
            b.to_async(&rt)
                .iter(|| manager.parse_file_and_subs(black_box(&root), &root))
        });

        group.bench_function(BenchmarkId::new("included_tex", label), |b| {
            b.iter(|| black_box(manager.get_included_tex(None)))
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: stripping and scanning a single large file
// ---------------------------------------------------------------------------

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    let project = TestProject::generated(&FixtureConfig::large()).unwrap();
    let content = std::fs::read_to_string(project.path("main.tex")).unwrap();
    let verbatim = ProjectConfig::default().verbatim_envs;

    group.bench_function("strip", |b| {
        b.iter(|| black_box(strip_comments_and_verbatim(black_box(&content), &verbatim)))
    });

    let stripped = strip_comments_and_verbatim(&content, &verbatim);
    group.bench_function("inclusions", |b| {
        b.iter(|| black_box(InclusionScanner::new(black_box(&stripped)).count()))
    });

    group.finish();
}

criterion_group!(benches, bench_cold_find_root, bench_warm_reparse, bench_scan);
criterion_main!(benches);
