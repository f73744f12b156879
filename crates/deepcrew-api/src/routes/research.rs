use std::convert::Infallible;
use std::pin::Pin;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::sse::{Event, Sse},
    routing::{get, post},
};
use deepcrew_core::relay::event_json;
use deepcrew_core::report::persist_report;
use deepcrew_core::{
    DeepCrewError, EventRelay, PhaseController, PhaseRecord, QualityControl, RelayFrame,
    ResearchInputs, relay_research,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Documents gathered per streamed run when the client does not ask for more.
pub const STREAM_MAX_DOCS: u32 = 5;

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Research parameters, accepted as a JSON body or as query parameters.
///
/// Unset quality knobs fall back to the configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ResearchRequest {
    #[serde(default)]
    pub query: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sources: Option<String>,
    pub max_docs: Option<u32>,
    pub depth_level: Option<u8>,
    pub quality_threshold: Option<f64>,
    pub enable_fact_checking: Option<bool>,
    pub enable_iterative_refinement: Option<bool>,
    pub max_iterations: Option<u32>,
    pub min_sources_per_claim: Option<u32>,
}

impl ResearchRequest {
    pub fn into_inputs(self, defaults: &QualityControl) -> Result<ResearchInputs, DeepCrewError> {
        let quality = QualityControl {
            depth_level: self.depth_level.unwrap_or(defaults.depth_level),
            quality_threshold: self
                .quality_threshold
                .unwrap_or(defaults.quality_threshold),
            enable_fact_checking: self
                .enable_fact_checking
                .unwrap_or(defaults.enable_fact_checking),
            enable_iterative_refinement: self
                .enable_iterative_refinement
                .unwrap_or(defaults.enable_iterative_refinement),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            min_sources_per_claim: self
                .min_sources_per_claim
                .unwrap_or(defaults.min_sources_per_claim),
        };

        let mut inputs = ResearchInputs::new(self.query.trim())
            .with_quality(quality)
            .with_dates(self.start_date, self.end_date)
            .with_sources(self.sources);
        if let Some(max_docs) = self.max_docs {
            inputs = inputs.with_max_docs(max_docs);
        }

        inputs.validate()?;
        Ok(inputs)
    }
}

#[derive(Debug, Serialize)]
pub struct ResearchResponse {
    pub status: &'static str,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    pub quality_score: f64,
    pub refinement_iterations: u32,
    pub phases: Vec<PhaseRecord>,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/research", post(run_research))
        .route("/research/stream", get(stream_research))
}

#[instrument(skip_all, fields(query = tracing::field::Empty))]
async fn run_research(
    State(state): State<AppState>,
    body: Result<Json<ResearchRequest>, JsonRejection>,
) -> Result<Json<ResearchResponse>, AppError> {
    let Json(request) = body?;
    let inputs = request.into_inputs(state.defaults())?;
    tracing::Span::current().record("query", inputs.query.as_str());
    let _permit = state.try_acquire_run()?;

    let outcome = PhaseController::new(state.executor()).run(inputs).await?;

    let report_path = state
        .report_dir()
        .map(|dir| persist_report(&dir, &Uuid::new_v4().to_string(), &outcome.report))
        .transpose()?
        .map(|path| path.display().to_string());

    info!(
        score = outcome.final_score.value(),
        refinements = outcome.refinement_iterations,
        "research request completed"
    );

    Ok(Json(ResearchResponse {
        status: "success",
        result: outcome.report,
        report_path,
        quality_score: outcome.final_score.value(),
        refinement_iterations: outcome.refinement_iterations,
        phases: outcome.phases,
    }))
}

async fn stream_research(
    State(state): State<AppState>,
    query: Result<Query<ResearchRequest>, QueryRejection>,
) -> Result<Sse<SseStream>, AppError> {
    let Query(mut request) = query?;
    request.max_docs = request.max_docs.or(Some(STREAM_MAX_DOCS));
    let inputs = request.into_inputs(state.defaults())?;
    let permit = state.try_acquire_run()?;

    let (relay, receiver) = EventRelay::channel();
    let executor = state.executor();
    let report_dir = state.report_dir();
    let span = info_span!("research_stream", query = %inputs.query);

    // The run owns its relay; a dropped client does not cancel it.
    tokio::spawn(
        async move {
            let _permit = permit;
            if let Err(err) = relay_research(executor, inputs, relay, report_dir.as_deref()).await
            {
                warn!(error = %err, "streamed research run failed");
            }
        }
        .instrument(span),
    );

    let stream = receiver
        .frames(state.heartbeat())
        .map(|frame| Ok::<_, Infallible>(sse_event(frame)));

    Ok(Sse::new(Box::pin(stream) as SseStream))
}

fn sse_event(frame: RelayFrame) -> Event {
    match frame {
        RelayFrame::Event(event) => Event::default().data(event_json(&event)),
        RelayFrame::Heartbeat => Event::default().comment("keepalive"),
    }
}
