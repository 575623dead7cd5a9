//! Integration tests for graph execution: ordering, idempotence, failure
//! containment, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use cistep_core::fakes::{FakeStep, Journal};
use cistep_core::{
    build_graph, CancelSignal, Executor, ExecutorConfig, Link, NodeStatus,
    PipelineImageStreamTagReference, Step,
};

fn tag(t: &str) -> Link {
    Link::internal_image(PipelineImageStreamTagReference::new(t))
}

fn dyn_steps(steps: &[Arc<FakeStep>]) -> Vec<Arc<dyn Step>> {
    steps
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn Step>)
        .collect()
}

/// root -> src -> [bin, unit]; bin -> e2e
fn pipeline(journal: &Arc<Journal>) -> Vec<Arc<FakeStep>> {
    let step = |name: &str| {
        FakeStep::new(name)
            .with_delay(Duration::from_millis(5))
            .with_journal(Arc::clone(journal))
    };
    vec![
        Arc::new(step("e2e").requires(tag("bin"))),
        Arc::new(step("unit").requires(tag("src"))),
        Arc::new(step("bin").requires(tag("src")).creates(tag("bin"))),
        Arc::new(step("src").requires(tag("root")).creates(tag("src"))),
        Arc::new(step("root").creates(tag("root"))),
    ]
}

#[tokio::test]
async fn every_step_starts_after_its_producers_finish() {
    let journal = Arc::new(Journal::new());
    let steps = pipeline(&journal);
    let graph = build_graph(&dyn_steps(&steps));

    let report = Executor::default()
        .execute(&graph, false, &CancelSignal::new())
        .await
        .expect("pipeline succeeds");

    assert_eq!(report.succeeded_count(), 5);
    assert!(journal.finished_before_started("root", "src"));
    assert!(journal.finished_before_started("src", "bin"));
    assert!(journal.finished_before_started("src", "unit"));
    assert!(journal.finished_before_started("bin", "e2e"));
}

#[tokio::test]
async fn second_execution_skips_everything() {
    let journal = Arc::new(Journal::new());
    let steps = pipeline(&journal);
    let graph = build_graph(&dyn_steps(&steps));
    let executor = Executor::default();

    executor
        .execute(&graph, false, &CancelSignal::new())
        .await
        .expect("first run");
    let report = executor
        .execute(&graph, false, &CancelSignal::new())
        .await
        .expect("second run");

    assert_eq!(report.skipped_count(), 5);
    assert_eq!(report.succeeded_count(), 0);
    for step in &steps {
        assert_eq!(step.run_calls(), 1, "{} ran again", step.name());
    }
}

#[tokio::test]
async fn failure_is_contained_to_descendants() {
    let broken = Arc::new(FakeStep::new("broken").creates(tag("a")).failing_run("image pull failed"));
    let after_broken = Arc::new(FakeStep::new("after-broken").requires(tag("a")).creates(tag("a2")));
    let deep = Arc::new(FakeStep::new("deep").requires(tag("a2")));
    let healthy = Arc::new(FakeStep::new("healthy").creates(tag("b")));
    let after_healthy = Arc::new(FakeStep::new("after-healthy").requires(tag("b")));
    let steps = [
        broken.clone(),
        after_broken.clone(),
        deep.clone(),
        healthy.clone(),
        after_healthy.clone(),
    ];
    let graph = build_graph(&dyn_steps(&steps));

    let failure = Executor::default()
        .execute(&graph, false, &CancelSignal::new())
        .await
        .expect_err("broken step fails the execution");

    assert_eq!(after_broken.run_calls(), 0);
    assert_eq!(after_broken.done_calls(), 0);
    assert_eq!(deep.run_calls(), 0);
    assert_eq!(healthy.run_calls(), 1);
    assert_eq!(after_healthy.run_calls(), 1);

    let report = &failure.report;
    assert_eq!(report.outcome("broken").unwrap().status, NodeStatus::Failed);
    for blocked in ["after-broken", "deep"] {
        let outcome = report.outcome(blocked).unwrap();
        assert_eq!(outcome.status, NodeStatus::SkippedDueToFailure);
        assert_eq!(outcome.blocked_by.as_deref(), Some("broken"));
    }
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(
        failure.to_string(),
        "execution failed: 1 step(s) failed: broken: image pull failed"
    );
}

#[tokio::test]
async fn every_failure_is_aggregated() {
    let a = Arc::new(FakeStep::new("a").failing_run("boom"));
    let b = Arc::new(FakeStep::new("b").failing_run("bang"));
    let c = Arc::new(FakeStep::new("c"));
    let graph = build_graph(&dyn_steps(&[a, b, c.clone()]));

    let failure = Executor::default()
        .execute(&graph, false, &CancelSignal::new())
        .await
        .expect_err("two roots fail");

    let mut failed: Vec<String> = failure.failures.iter().map(ToString::to_string).collect();
    failed.sort();
    assert_eq!(failed, vec!["a: boom", "b: bang"]);
    assert_eq!(c.run_calls(), 1);
}

#[tokio::test]
async fn cancellation_stops_in_flight_and_pending_steps() {
    let slow = |name: &str| {
        Arc::new(
            FakeStep::new(name)
                .creates(tag(name))
                .with_delay(Duration::from_secs(30)),
        )
    };
    let first = slow("first");
    let second = slow("second");
    let child = Arc::new(FakeStep::new("child").requires(tag("first")).requires(tag("second")));
    let graph = build_graph(&dyn_steps(&[first.clone(), second.clone(), child.clone()]));

    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    // A single slot keeps one root waiting behind the other.
    let failure = tokio::time::timeout(
        Duration::from_secs(5),
        Executor::new(ExecutorConfig::default().with_max_parallelism(1))
            .execute(&graph, false, &cancel),
    )
    .await
    .expect("cancellation is prompt")
    .expect_err("cancelled execution is a failure");

    let report = &failure.report;
    assert!(report.cancelled);
    assert_eq!(first.run_calls() + second.run_calls(), 1);
    assert!(!first.is_done() && !second.is_done());
    assert_eq!(child.done_calls(), 0);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.not_started_count(), 1);
    assert_eq!(
        report.outcome("child").unwrap().status,
        NodeStatus::SkippedDueToFailure
    );
    assert!(failure.to_string().starts_with("execution cancelled"));
    assert!(failure.to_string().contains("step cancelled"));
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let a = Arc::new(FakeStep::new("a"));
    let graph = build_graph(&dyn_steps(&[a.clone()]));
    let cancel = CancelSignal::new();
    cancel.cancel();

    let failure = Executor::default()
        .execute(&graph, false, &cancel)
        .await
        .expect_err("nothing ran");

    assert!(failure.report.cancelled);
    assert_eq!(a.done_calls(), 0);
    assert_eq!(failure.report.not_started_count(), 1);
}
