//! DeepCrew core: phase-controlled research runs with streamed status events.
//!
//! A [`PhaseController`] drives a request through research, bounded
//! refinement and reporting, delegating each phase to a [`PhaseExecutor`].
//! Progress is reported through an [`ExecutionObserver`]; the
//! [`EventRelay`] turns those notifications into an ordered event stream
//! with heartbeats. [`CrewExecutor`] is the built-in executor, a
//! `graph_flow` graph over a [`DocumentSource`].

pub mod claims;
pub mod config;
pub mod corpus;
mod error;
pub mod events;
pub mod factcheck;
mod inputs;
pub mod metrics;
pub mod observer;
mod phase;
pub mod relay;
pub mod report;
mod tasks;
mod telemetry;
mod workflow;

pub use config::{Config, ConfigLoader};
pub use corpus::{Document, DocumentSource, StaticCorpus};
pub use error::{DeepCrewError, PhaseError};
pub use events::{StatusEvent, StatusEventKind};
pub use inputs::{MAX_REFINEMENT_ITERATIONS, QualityControl, ResearchInputs};
pub use observer::{ExecutionObserver, NoopObserver, StepOutput, TaskOutput};
pub use phase::{
    BlockingExecutor, Phase, PhaseController, PhaseExecutor, PhaseRecord, PhaseRequest,
    PhaseResult, QualityScore, ResearchOutcome, next_phase,
};
pub use relay::{EventRelay, RelayFrame, RelayReceiver, RelayStream};
pub use tasks::{
    ClaimExtractionTask, FactCheckTask, ReportTask, SearchTask, Synthesis, SynthesisTask,
    documents_per_pass, quality_score,
};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use workflow::{
    BaseGraphTasks, CrewExecutor, GraphCustomizer, build_graph, relay_research, run_research,
};
