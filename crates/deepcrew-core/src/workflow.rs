use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::corpus::{DocumentSource, StaticCorpus};
use crate::error::{DeepCrewError, PhaseError};
use crate::events::StatusEvent;
use crate::inputs::ResearchInputs;
use crate::observer::ExecutionObserver;
use crate::phase::{
    Phase, PhaseController, PhaseExecutor, PhaseRequest, PhaseResult, ResearchOutcome,
};
use crate::relay::EventRelay;
use crate::report::persist_report;
use crate::tasks::{
    ClaimExtractionTask, FactCheckTask, ReportTask, SearchTask, Synthesis, SynthesisTask,
};

/// Exposes the tasks of the research graph so callers can extend the wiring.
#[derive(Clone)]
pub struct BaseGraphTasks {
    pub search: Arc<SearchTask>,
    pub claims: Arc<ClaimExtractionTask>,
    pub fact_check: Arc<FactCheckTask>,
    pub synthesis: Arc<SynthesisTask>,
    pub report: Arc<ReportTask>,
}

impl BaseGraphTasks {
    fn new(source: Arc<dyn DocumentSource>, observer: Arc<dyn ExecutionObserver>) -> Self {
        Self {
            search: Arc::new(SearchTask::new(source, observer.clone())),
            claims: Arc::new(ClaimExtractionTask::new(observer.clone())),
            fact_check: Arc::new(FactCheckTask::new(observer.clone())),
            synthesis: Arc::new(SynthesisTask::new(observer.clone())),
            report: Arc::new(ReportTask::new(observer)),
        }
    }
}

/// Customisation hook for callers to add tasks/edges before the default wiring is applied.
pub type GraphCustomizer = dyn Fn(GraphBuilder, &BaseGraphTasks) -> GraphBuilder + Send + Sync;

/// Build the research graph.
///
/// `search -> claims -> [fact_check] -> synthesis`, with fact checking taken
/// only when `quality.enable_fact_checking` is set. `report` is a separate
/// entry point used by the reporting phase.
pub fn build_graph(
    source: Arc<dyn DocumentSource>,
    observer: Arc<dyn ExecutionObserver>,
    customizer: Option<&GraphCustomizer>,
) -> (Arc<Graph>, BaseGraphTasks) {
    let tasks = BaseGraphTasks::new(source, observer);

    let builder = GraphBuilder::new("deepcrew_research")
        .add_task(tasks.search.clone())
        .add_task(tasks.claims.clone())
        .add_task(tasks.fact_check.clone())
        .add_task(tasks.synthesis.clone())
        .add_task(tasks.report.clone());

    let builder = if let Some(customize) = customizer {
        customize(builder, &tasks)
    } else {
        builder
    };

    let builder = builder
        .add_edge(tasks.search.id(), tasks.claims.id())
        .add_conditional_edge(
            tasks.claims.id(),
            |ctx| ctx.get_sync::<bool>("quality.enable_fact_checking").unwrap_or(true),
            tasks.fact_check.id(),
            tasks.synthesis.id(),
        )
        .add_edge(tasks.fact_check.id(), tasks.synthesis.id())
        .set_start_task(tasks.search.id());

    (Arc::new(builder.build()), tasks)
}

/// Phase executor backed by the graph_flow research graph.
///
/// Each phase runs in its own in-memory session; the synthesis of a
/// research or refining pass travels to the next phase as the result payload.
#[derive(Clone)]
pub struct CrewExecutor {
    source: Arc<dyn DocumentSource>,
    customizer: Option<Arc<GraphCustomizer>>,
}

impl Default for CrewExecutor {
    fn default() -> Self {
        Self::new(Arc::new(StaticCorpus::new()))
    }
}

impl CrewExecutor {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self {
            source,
            customizer: None,
        }
    }

    pub fn with_customizer(mut self, customizer: Arc<GraphCustomizer>) -> Self {
        self.customizer = Some(customizer);
        self
    }

    async fn run_phase(&self, request: &PhaseRequest) -> anyhow::Result<PhaseResult> {
        let (graph, tasks) = build_graph(
            self.source.clone(),
            request.observer.clone(),
            self.customizer.as_deref(),
        );

        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(graph, storage.clone());

        let start_task = match request.phase {
            Phase::Reporting => tasks.report.id().to_string(),
            _ => tasks.search.id().to_string(),
        };
        let session_id = format!("{}-{}", request.phase.as_str(), Uuid::new_v4());
        let session = Session::new_from_task(session_id.clone(), &start_task);

        let previous = previous_synthesis(request)?;
        session
            .context
            .set("inputs", request.inputs.as_ref().clone())
            .await;
        session.context.set("phase.iteration", request.iteration).await;
        session.context.set_sync(
            "quality.enable_fact_checking",
            request.inputs.quality.enable_fact_checking,
        );
        if let Some(previous) = &previous {
            session.context.set("previous.synthesis", previous).await;
        }

        storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist session: {err}"))?;

        loop {
            let result = runner
                .run(&session_id)
                .await
                .map_err(|err| anyhow!("graph execution failure: {err}"))?;

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => return Err(anyhow!(message)),
            }
        }

        let session = storage
            .get(&session_id)
            .await
            .map_err(|err| anyhow!("failed to reload session: {err}"))?
            .ok_or_else(|| anyhow!("session missing after execution"))?;

        if request.phase == Phase::Reporting {
            let report: String = session
                .context
                .get("report.text")
                .await
                .ok_or_else(|| anyhow!("report task recorded no report"))?;
            let mut result = PhaseResult::new(report.clone()).with_report(report);
            if let Some(previous) = previous {
                result = result.with_score(previous.score);
            }
            return Ok(result);
        }

        let synthesis: Synthesis = session
            .context
            .get("synthesis.output")
            .await
            .ok_or_else(|| anyhow!("synthesis task recorded no output"))?;
        debug!(
            phase = request.phase.as_str(),
            score = synthesis.score,
            "graph phase finished"
        );

        Ok(PhaseResult::new(synthesis.summary_line())
            .with_score(synthesis.score)
            .with_payload(serde_json::to_value(&synthesis)?))
    }
}

fn previous_synthesis(request: &PhaseRequest) -> anyhow::Result<Option<Synthesis>> {
    match &request.previous {
        Some(previous) if !previous.payload.is_null() => {
            Ok(Some(serde_json::from_value(previous.payload.clone())?))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl PhaseExecutor for CrewExecutor {
    #[instrument(
        name = "crew_executor.execute",
        skip_all,
        fields(phase = request.phase.as_str(), iteration = request.iteration)
    )]
    async fn execute(&self, request: PhaseRequest) -> Result<PhaseResult, PhaseError> {
        self.run_phase(&request)
            .await
            .map_err(|err| PhaseError::new(request.phase, err.to_string()))
    }
}

/// Run a full research request against the built-in document corpus.
pub async fn run_research(inputs: ResearchInputs) -> Result<ResearchOutcome, DeepCrewError> {
    PhaseController::new(Arc::new(CrewExecutor::default()))
        .run(inputs)
        .await
}

/// Run a request while narrating it on `relay`.
///
/// Publishes `started`, every phase notification, then `completed` with the
/// report and quality score or a single `error`, and always ends with `done`.
/// When `report_dir` is set the report is written there and its path added
/// to the `completed` event.
#[instrument(name = "relay_research", skip_all, fields(query = %inputs.query))]
pub async fn relay_research(
    executor: Arc<dyn PhaseExecutor>,
    inputs: ResearchInputs,
    relay: EventRelay,
    report_dir: Option<&Path>,
) -> Result<ResearchOutcome, DeepCrewError> {
    relay.publish(StatusEvent::started(format!(
        "Starting research on: {}",
        inputs.query
    )));

    let controller = PhaseController::new(executor).with_observer(Arc::new(relay.clone()));
    let outcome = controller.run(inputs).await.and_then(|outcome| {
        let path = report_dir
            .map(|dir| persist_report(dir, &Uuid::new_v4().to_string(), &outcome.report))
            .transpose()?;
        Ok((outcome, path))
    });

    let result = match outcome {
        Ok((outcome, path)) => {
            let mut event = StatusEvent::completed(outcome.report.clone())
                .with_extra("quality_score", outcome.final_score.value())
                .with_extra("refinement_iterations", outcome.refinement_iterations);
            if let Some(path) = path {
                event = event.with_extra("report_path", path.display().to_string());
            }
            relay.publish(event);
            Ok(outcome)
        }
        Err(err) => {
            warn!(error = %err, "research run failed");
            relay.on_error(&err.to_string());
            Err(err)
        }
    };

    relay.finish();
    result
}
