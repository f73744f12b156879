//! Phase controller: research, bounded refinement, report.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::error::{DeepCrewError, PhaseError};
use crate::inputs::{QualityControl, ResearchInputs};
use crate::metrics;
use crate::observer::{ExecutionObserver, NoopObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Research,
    Refining,
    Reporting,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Refining => "refining",
            Phase::Reporting => "reporting",
            Phase::Done => "done",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Phase::Research => "Compiling sources, extracting and checking claims",
            Phase::Refining => "Running targeted follow-up research to close quality gaps",
            Phase::Reporting => "Composing the final research report",
            Phase::Done => "Research run finished",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised `[0, 1]` quality metric gating the refinement loop.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityScore(f64);

impl QualityScore {
    pub const ZERO: QualityScore = QualityScore(0.0);

    /// Clamp into `[0, 1]`; NaN maps to zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            Self::ZERO
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.0 >= threshold
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// What an executor returns for one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseResult {
    pub score: Option<QualityScore>,
    pub report: Option<String>,
    pub raw: String,
    /// Executor-private state handed back in the next phase request.
    #[serde(default)]
    pub payload: Value,
}

impl PhaseResult {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Self::default()
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(QualityScore::new(score));
        self
    }

    pub fn with_report(mut self, report: impl Into<String>) -> Self {
        self.report = Some(report.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Input of one executor invocation.
#[derive(Clone)]
pub struct PhaseRequest {
    pub phase: Phase,
    /// Refinement pass number (1-based); zero outside the refining phase.
    pub iteration: u32,
    pub inputs: Arc<ResearchInputs>,
    pub previous: Option<PhaseResult>,
    /// Sink for the executor's fine-grained lifecycle notifications.
    pub observer: Arc<dyn ExecutionObserver>,
}

impl PhaseRequest {
    pub fn input_map(&self) -> Map<String, Value> {
        let mut map = self.inputs.input_map();
        map.insert("phase".into(), Value::from(self.phase.as_str()));
        map.insert("iteration".into(), Value::from(self.iteration));
        map
    }
}

/// Opaque engine that carries out a single phase.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, request: PhaseRequest) -> Result<PhaseResult, PhaseError>;
}

/// Runs a synchronous, long-running executor on the blocking thread pool.
pub struct BlockingExecutor<F> {
    inner: Arc<F>,
}

impl<F> BlockingExecutor<F>
where
    F: Fn(PhaseRequest) -> Result<PhaseResult, PhaseError> + Send + Sync + 'static,
{
    pub fn new(inner: F) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl<F> PhaseExecutor for BlockingExecutor<F>
where
    F: Fn(PhaseRequest) -> Result<PhaseResult, PhaseError> + Send + Sync + 'static,
{
    async fn execute(&self, request: PhaseRequest) -> Result<PhaseResult, PhaseError> {
        let phase = request.phase;
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner(request))
            .await
            .map_err(|err| PhaseError::new(phase, format!("executor worker failed: {err}")))?
    }
}

/// Decide the phase following `current`.
///
/// `refinements_done` counts refining passes already completed, including
/// the one that produced `score` when `current` is [`Phase::Refining`].
pub fn next_phase(
    current: Phase,
    score: QualityScore,
    refinements_done: u32,
    quality: &QualityControl,
) -> Phase {
    let below_threshold = !score.meets(quality.quality_threshold);
    match current {
        Phase::Research => {
            if quality.enable_iterative_refinement && quality.max_iterations > 0 && below_threshold
            {
                Phase::Refining
            } else {
                Phase::Reporting
            }
        }
        Phase::Refining => {
            if refinements_done < quality.max_iterations && below_threshold {
                Phase::Refining
            } else {
                Phase::Reporting
            }
        }
        Phase::Reporting | Phase::Done => Phase::Done,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub iteration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<QualityScore>,
    pub duration_ms: u64,
}

/// Result of a complete research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub report: String,
    pub final_score: QualityScore,
    pub refinement_iterations: u32,
    pub phases: Vec<PhaseRecord>,
}

/// Drives one research request through its phases.
#[derive(Clone)]
pub struct PhaseController {
    executor: Arc<dyn PhaseExecutor>,
    observer: Arc<dyn ExecutionObserver>,
}

impl PhaseController {
    pub fn new(executor: Arc<dyn PhaseExecutor>) -> Self {
        Self {
            executor,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run research, refinement and reporting. Any executor failure aborts the run.
    #[instrument(name = "phase_controller.run", skip_all, fields(query = %inputs.query))]
    pub async fn run(&self, inputs: ResearchInputs) -> Result<ResearchOutcome, DeepCrewError> {
        inputs.validate()?;
        let inputs = Arc::new(inputs);
        let quality = inputs.quality.clone();

        let mut phase = Phase::Research;
        let mut score = QualityScore::ZERO;
        let mut refinements = 0u32;
        let mut previous: Option<PhaseResult> = None;
        let mut records = Vec::new();
        let mut report = String::new();

        while phase != Phase::Done {
            let iteration = if phase == Phase::Refining {
                refinements + 1
            } else {
                0
            };

            self.observer
                .on_task_start(phase.as_str(), phase.description());

            let request = PhaseRequest {
                phase,
                iteration,
                inputs: inputs.clone(),
                previous: previous.take(),
                observer: self.observer.clone(),
            };

            let started = Instant::now();
            let outcome = self.executor.execute(request).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(result) => {
                    metrics::record_phase_metrics(phase.as_str(), "ok", duration_ms);
                    result
                }
                Err(err) => {
                    metrics::record_phase_metrics(phase.as_str(), "error", duration_ms);
                    warn!(phase = phase.as_str(), error = %err, "phase failed; aborting run");
                    return Err(err.into());
                }
            };

            match phase {
                Phase::Reporting => {
                    if let Some(reported) = result.score {
                        score = reported;
                    }
                    report = result
                        .report
                        .clone()
                        .unwrap_or_else(|| result.raw.clone());
                }
                _ => {
                    score = result.score.unwrap_or(QualityScore::ZERO);
                }
            }
            if phase == Phase::Refining {
                refinements += 1;
            }

            records.push(PhaseRecord {
                phase,
                iteration,
                score: result.score,
                duration_ms,
            });

            info!(
                phase = phase.as_str(),
                iteration,
                score = score.value(),
                duration_ms,
                "phase completed"
            );
            self.observer.on_progress(
                &format!("{} phase completed (quality score {score})", phase.as_str()),
                json!({
                    "phase": phase.as_str(),
                    "iteration": iteration,
                    "score": score.value(),
                }),
            );

            let next = next_phase(phase, score, refinements, &quality);
            if next == Phase::Refining {
                self.observer.on_system(&format!(
                    "Quality score {score} below threshold {:.2}; starting refinement pass {} of {}",
                    quality.quality_threshold,
                    refinements + 1,
                    quality.max_iterations
                ));
            }

            previous = Some(result);
            phase = next;
        }

        metrics::record_refinements(refinements);

        Ok(ResearchOutcome {
            report,
            final_score: score,
            refinement_iterations: refinements,
            phases: records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn quality(threshold: f64, max_iterations: u32, refine: bool) -> QualityControl {
        QualityControl {
            quality_threshold: threshold,
            max_iterations,
            enable_iterative_refinement: refine,
            ..QualityControl::default()
        }
    }

    #[test]
    fn research_skips_refinement_when_disabled_or_good_enough() {
        let low = QualityScore::new(0.1);
        let high = QualityScore::new(0.9);

        assert_eq!(
            next_phase(Phase::Research, low, 0, &quality(0.7, 2, false)),
            Phase::Reporting
        );
        assert_eq!(
            next_phase(Phase::Research, high, 0, &quality(0.7, 2, true)),
            Phase::Reporting
        );
        assert_eq!(
            next_phase(Phase::Research, low, 0, &quality(0.7, 0, true)),
            Phase::Reporting
        );
        assert_eq!(
            next_phase(Phase::Research, low, 0, &quality(0.7, 2, true)),
            Phase::Refining
        );
    }

    #[test]
    fn refining_stops_at_budget_or_threshold() {
        let q = quality(0.7, 2, true);
        assert_eq!(
            next_phase(Phase::Refining, QualityScore::new(0.6), 1, &q),
            Phase::Refining
        );
        assert_eq!(
            next_phase(Phase::Refining, QualityScore::new(0.6), 2, &q),
            Phase::Reporting
        );
        assert_eq!(
            next_phase(Phase::Refining, QualityScore::new(0.7), 1, &q),
            Phase::Reporting
        );
        assert_eq!(
            next_phase(Phase::Reporting, QualityScore::ZERO, 0, &q),
            Phase::Done
        );
    }

    #[test]
    fn quality_score_is_clamped() {
        assert_eq!(QualityScore::new(1.4).value(), 1.0);
        assert_eq!(QualityScore::new(-0.2).value(), 0.0);
        assert_eq!(QualityScore::new(f64::NAN).value(), 0.0);
    }

    /// Returns scores from a fixed script and logs every call.
    struct ScriptedExecutor {
        scores: Mutex<Vec<f64>>,
        calls: Mutex<Vec<(Phase, u32)>>,
        fail_on: Option<Phase>,
    }

    impl ScriptedExecutor {
        fn new(scores: Vec<f64>) -> Self {
            Self {
                scores: Mutex::new(scores),
                calls: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn calls(&self) -> Vec<(Phase, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PhaseExecutor for ScriptedExecutor {
        async fn execute(&self, request: PhaseRequest) -> Result<PhaseResult, PhaseError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.phase, request.iteration));
            if self.fail_on == Some(request.phase) {
                return Err(PhaseError::new(request.phase, "executor exploded"));
            }
            if request.phase == Phase::Reporting {
                return Ok(PhaseResult::new("raw report").with_report("final report"));
            }
            let mut scores = self.scores.lock().unwrap();
            let score = if scores.len() > 1 {
                scores.remove(0)
            } else {
                scores[0]
            };
            Ok(PhaseResult::new(format!("score {score}")).with_score(score))
        }
    }

    #[tokio::test]
    async fn refines_until_budget_exhausted() {
        let executor = Arc::new(ScriptedExecutor::new(vec![0.5, 0.6, 0.7]));
        let controller = PhaseController::new(executor.clone());
        let inputs = ResearchInputs::new("transformers").with_quality(quality(0.7, 2, true));

        let outcome = controller.run(inputs).await.unwrap();

        assert_eq!(outcome.refinement_iterations, 2);
        assert!((outcome.final_score.value() - 0.7).abs() < 1e-9);
        assert_eq!(outcome.report, "final report");
        assert_eq!(
            executor.calls(),
            vec![
                (Phase::Research, 0),
                (Phase::Refining, 1),
                (Phase::Refining, 2),
                (Phase::Reporting, 0)
            ]
        );
    }

    #[tokio::test]
    async fn never_exceeds_max_iterations_with_persistently_low_score() {
        let executor = Arc::new(ScriptedExecutor::new(vec![0.0]));
        let controller = PhaseController::new(executor.clone());
        let inputs = ResearchInputs::new("q").with_quality(quality(0.9, 3, true));

        let outcome = controller.run(inputs).await.unwrap();

        assert_eq!(outcome.refinement_iterations, 3);
        assert_eq!(executor.calls().len(), 3 + 2);
    }

    #[tokio::test]
    async fn disabled_refinement_never_enters_refining() {
        let executor = Arc::new(ScriptedExecutor::new(vec![0.0]));
        let controller = PhaseController::new(executor.clone());
        let inputs = ResearchInputs::new("q").with_quality(quality(0.9, 5, false));

        let outcome = controller.run(inputs).await.unwrap();

        assert_eq!(outcome.refinement_iterations, 0);
        assert_eq!(
            executor.calls(),
            vec![(Phase::Research, 0), (Phase::Reporting, 0)]
        );
    }

    #[tokio::test]
    async fn research_failure_aborts_before_other_phases() {
        let mut executor = ScriptedExecutor::new(vec![0.2]);
        executor.fail_on = Some(Phase::Research);
        let executor = Arc::new(executor);
        let controller = PhaseController::new(executor.clone());

        let err = controller
            .run(ResearchInputs::new("q"))
            .await
            .expect_err("research failure must abort");

        assert!(matches!(err, DeepCrewError::Phase(ref phase) if phase.phase == Phase::Research));
        assert_eq!(executor.calls(), vec![(Phase::Research, 0)]);
    }

    #[tokio::test]
    async fn validation_error_runs_no_phase() {
        let executor = Arc::new(ScriptedExecutor::new(vec![0.9]));
        let controller = PhaseController::new(executor.clone());

        let err = controller.run(ResearchInputs::new("")).await.unwrap_err();

        assert!(matches!(err, DeepCrewError::Validation(_)));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn blocking_executor_runs_off_the_async_runtime() {
        let executor = BlockingExecutor::new(|request: PhaseRequest| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            let query = request.input_map()["query"].as_str().unwrap_or_default().to_string();
            Ok(PhaseResult::new(query).with_score(1.0))
        });
        let controller = PhaseController::new(Arc::new(executor));

        let outcome = controller
            .run(ResearchInputs::new("blocking"))
            .await
            .unwrap();

        assert_eq!(outcome.refinement_iterations, 0);
        assert_eq!(outcome.report, "blocking");
        assert_eq!(outcome.phases.len(), 2);
    }
}
