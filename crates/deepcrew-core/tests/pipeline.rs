use std::sync::Arc;

use async_trait::async_trait;
use deepcrew_core::relay::DEFAULT_HEARTBEAT;
use deepcrew_core::{
    CrewExecutor, DeepCrewError, EventRelay, Phase, PhaseError, PhaseExecutor, PhaseRequest,
    PhaseResult, QualityControl, RelayFrame, ResearchInputs, StatusEvent, StatusEventKind,
    relay_research, run_research,
};
use futures::StreamExt;

fn inputs(depth_level: u8, fact_checking: bool, threshold: f64) -> ResearchInputs {
    ResearchInputs::new("grid storage").with_quality(QualityControl {
        depth_level,
        enable_fact_checking: fact_checking,
        quality_threshold: threshold,
        ..QualityControl::default()
    })
}

async fn relayed_events(
    executor: Arc<dyn PhaseExecutor>,
    inputs: ResearchInputs,
) -> (Result<deepcrew_core::ResearchOutcome, DeepCrewError>, Vec<StatusEvent>) {
    let (relay, receiver) = EventRelay::channel();
    let run = tokio::spawn(async move { relay_research(executor, inputs, relay, None).await });

    let frames: Vec<RelayFrame> = receiver.frames(DEFAULT_HEARTBEAT).collect().await;
    let outcome = run.await.expect("research task panicked");

    let events = frames
        .into_iter()
        .filter_map(|frame| match frame {
            RelayFrame::Event(event) => Some(event),
            RelayFrame::Heartbeat => None,
        })
        .collect();
    (outcome, events)
}

#[tokio::test]
async fn full_coverage_skips_refinement() {
    let outcome = run_research(inputs(1, false, 0.7))
        .await
        .expect("research should succeed");

    assert_eq!(outcome.refinement_iterations, 0);
    assert!((outcome.final_score.value() - 1.0).abs() < 1e-9);
    assert!(
        outcome.report.starts_with("# Research Report: grid storage"),
        "unexpected report: {}",
        outcome.report
    );
    assert!(outcome.report.contains("Fact checking: disabled"));
    let phases: Vec<Phase> = outcome.phases.iter().map(|record| record.phase).collect();
    assert_eq!(phases, vec![Phase::Research, Phase::Reporting]);
}

#[tokio::test]
async fn refinement_pulls_more_sources_until_budget_is_spent() {
    let outcome = run_research(inputs(5, false, 0.95))
        .await
        .expect("research should succeed");

    assert_eq!(outcome.refinement_iterations, 2);
    assert!((outcome.final_score.value() - 0.8).abs() < 1e-9);
    assert_eq!(outcome.phases.len(), 4);
    assert!(outcome.report.contains("https://example.com/research/8"));
}

#[tokio::test]
async fn fact_checked_run_streams_ordered_events() {
    let (outcome, events) =
        relayed_events(Arc::new(CrewExecutor::default()), inputs(3, true, 0.7)).await;

    let outcome = outcome.expect("research should succeed");
    assert!(outcome.refinement_iterations <= 2);
    assert!(outcome.report.contains("## Verification"));

    let kinds: Vec<StatusEventKind> = events.iter().map(|event| event.kind).collect();
    assert_eq!(kinds.first(), Some(&StatusEventKind::Started));
    assert_eq!(kinds.last(), Some(&StatusEventKind::Done));
    assert_eq!(kinds[kinds.len() - 2], StatusEventKind::Completed);
    assert_eq!(
        kinds.iter().filter(|kind| **kind == StatusEventKind::Done).count(),
        1
    );
    assert!(!kinds.contains(&StatusEventKind::Error));

    let agents: Vec<&str> = events
        .iter()
        .filter(|event| event.kind == StatusEventKind::AgentStarted)
        .filter_map(|event| event.agent.as_deref())
        .collect();
    assert!(agents.contains(&"Cross-Reference Specialist"));
    assert!(agents.contains(&"Report Composer"));

    let completed = &events[events.len() - 2];
    assert_eq!(
        completed.extra.get("result").and_then(|v| v.as_str()),
        Some(outcome.report.as_str())
    );
    assert!(completed.extra.contains_key("quality_score"));
}

struct ExplodingExecutor;

#[async_trait]
impl PhaseExecutor for ExplodingExecutor {
    async fn execute(&self, request: PhaseRequest) -> Result<PhaseResult, PhaseError> {
        Err(PhaseError::new(request.phase, "search backend unavailable"))
    }
}

#[tokio::test]
async fn executor_failure_streams_error_then_done() {
    let (outcome, events) = relayed_events(Arc::new(ExplodingExecutor), inputs(3, true, 0.7)).await;

    assert!(matches!(outcome, Err(DeepCrewError::Phase(_))));

    let kinds: Vec<StatusEventKind> = events.iter().map(|event| event.kind).collect();
    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[StatusEventKind::Error, StatusEventKind::Done]
    );
    assert!(!kinds.contains(&StatusEventKind::Completed));
    assert_eq!(
        kinds.iter().filter(|kind| **kind == StatusEventKind::Error).count(),
        1
    );
    assert!(events[events.len() - 2].message.contains("search backend unavailable"));
}

#[tokio::test]
async fn report_is_persisted_when_directory_is_given() {
    let dir = tempfile::tempdir().unwrap();
    let (relay, receiver) = EventRelay::channel();

    let outcome = relay_research(
        Arc::new(CrewExecutor::default()),
        inputs(1, false, 0.7),
        relay,
        Some(dir.path()),
    )
    .await
    .unwrap();

    let frames: Vec<RelayFrame> = receiver.frames(DEFAULT_HEARTBEAT).collect().await;
    let completed = frames
        .iter()
        .find_map(|frame| match frame {
            RelayFrame::Event(event) if event.kind == StatusEventKind::Completed => Some(event),
            _ => None,
        })
        .expect("completed event");
    let path = completed.extra["report_path"].as_str().unwrap();

    assert_eq!(std::fs::read_to_string(path).unwrap(), outcome.report);
}
