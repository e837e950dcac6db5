//! Time-budget regression tests for the project engine.
//!
//! These tests assert that key operations complete within wall-clock
//! thresholds. They only compile in release mode because debug timings are
//! not meaningful.
//!
//! Run with: `cargo test --release -p texproject --features test-support --test performance_budgets`
//!
//! CI adaptation: when `CI` is set, thresholds are multiplied by
//! `TEXPROJECT_PERF_CI_FACTOR` (default 3).

#![cfg(not(debug_assertions))]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use texproject::config::{ProjectConfig, StaticConfig};
use texproject::document_store::DocumentStore;
use texproject::fs::LocalFs;
use texproject::project::manager::{Collaborators, Manager};
use texproject::test_utils::fixture_project::{FixtureConfig, TestProject};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

/// Median wall-clock time of three runs of `f` on `rt`.
fn median_of_3<F, Fut>(rt: &tokio::runtime::Runtime, mut f: F) -> Duration
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut times = [Duration::ZERO; 3];
    for t in &mut times {
        let start = Instant::now();
        rt.block_on(f());
        *t = start.elapsed();
    }
    times.sort();
    times[1]
}

fn ci_factor_from(ci: Option<&str>, factor: Option<&str>) -> f64 {
    if !ci.is_some_and(|v| !v.is_empty()) {
        return 1.0;
    }
    factor
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|&f| f >= 1.0)
        .unwrap_or(3.0)
}

fn ci_factor() -> f64 {
    ci_factor_from(
        std::env::var("CI").ok().as_deref(),
        std::env::var("TEXPROJECT_PERF_CI_FACTOR").ok().as_deref(),
    )
}

fn assert_within_budget(label: &str, measured: Duration, budget_ms: u64) {
    let factor = ci_factor();
    let threshold = Duration::from_secs_f64(budget_ms as f64 * factor / 1000.0);
    assert!(
        measured <= threshold,
        "Time budget exceeded for '{label}': measured {measured:.1?}, \
         threshold {threshold:.1?} (base {budget_ms}ms × {factor:.1})",
    );
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn manager_for(project: &TestProject) -> Manager {
    let collaborators = Collaborators::new(
        Arc::new(LocalFs::new()),
        Arc::new(DocumentStore::new()),
        Arc::new(StaticConfig::new(ProjectConfig::default())),
    );
    Manager::new(Some(project.root().to_path_buf()), collaborators)
}

#[test]
fn ci_factor_defaults() {
    assert!((ci_factor_from(None, None) - 1.0).abs() < f64::EPSILON);
    assert!((ci_factor_from(Some("true"), None) - 3.0).abs() < f64::EPSILON);
    assert!((ci_factor_from(Some("true"), Some("5.0")) - 5.0).abs() < f64::EPSILON);
    assert!((ci_factor_from(Some("true"), Some("0.5")) - 3.0).abs() < f64::EPSILON);
}

#[test]
#[should_panic(expected = "Time budget exceeded")]
fn assert_within_budget_panics_for_slow_op() {
    assert_within_budget("slow_op", Duration::from_secs(1), 5);
}

// ---------------------------------------------------------------------------
// Budgets
// ---------------------------------------------------------------------------

#[test]
fn budget_cold_find_root_medium() {
    let rt = runtime();
    let project = TestProject::generated(&FixtureConfig::medium()).unwrap();
    let elapsed = median_of_3(&rt, || async {
        let manager = manager_for(&project);
        assert!(manager.find_root().await.is_some());
    });
    assert_within_budget("cold_find_root_medium", elapsed, 250);
}

#[test]
fn budget_warm_reparse_large() {
    let rt = runtime();
    let project = TestProject::generated(&FixtureConfig::large()).unwrap();
    let manager = manager_for(&project);
    let root = rt.block_on(manager.find_root()).unwrap();

    let elapsed = median_of_3(&rt, || manager.parse_file_and_subs(&root, &root));
    assert_within_budget("warm_reparse_large", elapsed, 100);
}

#[test]
fn budget_included_tex_large() {
    let rt = runtime();
    let project = TestProject::generated(&FixtureConfig::large()).unwrap();
    let manager = manager_for(&project);
    rt.block_on(manager.find_root());

    let elapsed = median_of_3(&rt, || async {
        assert_eq!(
            manager.get_included_tex(None).len(),
            FixtureConfig::large().tex_file_count()
        );
    });
    assert_within_budget("included_tex_large", elapsed, 20);
}
