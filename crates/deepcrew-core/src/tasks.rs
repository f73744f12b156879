use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::ResearchInputs;
use crate::claims::{Claim, ClaimExtractor, ConfidenceLevel};
use crate::corpus::{Document, DocumentSource};
use crate::factcheck::{self, FactChecker};
use crate::observer::{ExecutionObserver, StepOutput, TaskOutput};
use crate::report::render_report;

pub const SEARCH_TASK_ID: &str = "search";
pub const CLAIMS_TASK_ID: &str = "claims";
pub const FACT_CHECK_TASK_ID: &str = "fact_check";
pub const SYNTHESIS_TASK_ID: &str = "synthesis";
pub const REPORT_TASK_ID: &str = "report";

const KEY_FINDINGS: usize = 5;

/// State of the research carried between phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Synthesis {
    pub query: String,
    pub iteration: u32,
    pub documents: Vec<Document>,
    pub claims: Vec<Claim>,
    pub fact_checked: bool,
    pub corroborated_claims: usize,
    pub contradicted_claims: usize,
    pub coverage: f64,
    pub score: f64,
    pub key_findings: Vec<String>,
}

impl Synthesis {
    pub fn summary_line(&self) -> String {
        format!(
            "{} documents, {} claims, {} corroborated, quality score {:.2}",
            self.documents.len(),
            self.claims.len(),
            self.corroborated_claims,
            self.score
        )
    }
}

/// Documents scanned per research pass for a given depth.
pub fn documents_per_pass(inputs: &ResearchInputs) -> usize {
    (inputs.quality.depth_level as usize + 1).min(inputs.max_docs as usize)
}

/// Quality score of the research state.
///
/// With fact checking: `0.6 * corroborated_ratio + 0.4 * coverage`. Without
/// fact checking the score is the coverage alone. No claims yields zero.
pub fn quality_score(synthesis: &Synthesis, inputs: &ResearchInputs) -> (f64, f64) {
    let target_documents = 2.0 * f64::from(inputs.quality.depth_level.max(1));
    let coverage = (synthesis.documents.len() as f64 / target_documents).min(1.0);

    if synthesis.claims.is_empty() {
        return (coverage, 0.0);
    }
    if !synthesis.fact_checked {
        return (coverage, coverage);
    }

    let ratio = synthesis.corroborated_claims as f64 / synthesis.claims.len() as f64;
    (coverage, (0.6 * ratio + 0.4 * coverage).clamp(0.0, 1.0))
}

async fn load_inputs(context: &Context) -> graph_flow::Result<ResearchInputs> {
    context
        .get::<ResearchInputs>("inputs")
        .await
        .ok_or_else(|| GraphError::TaskExecutionFailed("research inputs missing".into()))
}

pub struct SearchTask {
    source: Arc<dyn DocumentSource>,
    observer: Arc<dyn ExecutionObserver>,
}

impl SearchTask {
    pub fn new(source: Arc<dyn DocumentSource>, observer: Arc<dyn ExecutionObserver>) -> Self {
        Self { source, observer }
    }
}

#[async_trait]
impl Task for SearchTask {
    fn id(&self) -> &str {
        SEARCH_TASK_ID
    }

    #[instrument(name = "task.search", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let inputs = load_inputs(&context).await?;
        let previous: Option<Synthesis> = context.get("previous.synthesis").await;
        let mut documents = previous.map(|prev| prev.documents).unwrap_or_default();

        let limit = documents_per_pass(&inputs)
            .min((inputs.max_docs as usize).saturating_sub(documents.len()));
        let offset = documents.len();

        self.observer.on_start(
            "Literature Miner",
            &format!(
                "Compile up to {limit} additional sources on \"{}\" ({} to {}, {})",
                inputs.query, inputs.start_date, inputs.end_date, inputs.sources
            ),
        );
        self.observer.on_step(StepOutput::Log(format!(
            "Thought: {offset} sources already collected, looking for {limit} more\nAction: document_search"
        )));

        self.observer.on_tool_start("document_search", &inputs.query);
        let found = if limit == 0 {
            Vec::new()
        } else {
            self.source
                .search(&inputs.query, limit, offset)
                .await
                .map_err(|err| {
                    GraphError::TaskExecutionFailed(format!("document search failed: {err}"))
                })?
        };
        self.observer
            .on_tool_end("document_search", &format!("{} documents", found.len()));

        let added = found.len();
        documents.extend(found);

        info!(query = %inputs.query, added, total = documents.len(), "search collected documents");
        context.set("research.documents", &documents).await;

        let summary = format!("Collected {added} new sources ({} total)", documents.len());
        self.observer
            .on_complete(TaskOutput::new(SEARCH_TASK_ID, summary.clone()));

        Ok(TaskResult::new(Some(summary), NextAction::ContinueAndExecute))
    }
}

pub struct ClaimExtractionTask {
    extractor: ClaimExtractor,
    observer: Arc<dyn ExecutionObserver>,
}

impl ClaimExtractionTask {
    pub fn new(observer: Arc<dyn ExecutionObserver>) -> Self {
        Self {
            extractor: ClaimExtractor::default(),
            observer,
        }
    }
}

#[async_trait]
impl Task for ClaimExtractionTask {
    fn id(&self) -> &str {
        CLAIMS_TASK_ID
    }

    #[instrument(name = "task.claims", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let documents: Vec<Document> = context
            .get("research.documents")
            .await
            .unwrap_or_default();

        self.observer.on_start(
            "Literature Miner",
            &format!("Extract factual claims from {} documents", documents.len()),
        );

        let mut claims = Vec::new();
        let mut sentences = 0usize;
        for document in &documents {
            self.observer
                .on_tool_start("claim_extractor", &document.document_id);
            let report = self.extractor.extract(document);
            self.observer.on_tool_end(
                "claim_extractor",
                &format!("{} claims", report.claims.len()),
            );
            sentences += report.sentences_analyzed;
            claims.extend(report.claims);
        }

        debug!(
            claims = claims.len(),
            sentences, "claim extraction finished"
        );
        context.set("research.claims", &claims).await;

        let summary = format!(
            "Extracted {} claims from {sentences} sentences",
            claims.len()
        );
        self.observer
            .on_complete(TaskOutput::new(CLAIMS_TASK_ID, summary.clone()));

        Ok(TaskResult::new(Some(summary), NextAction::ContinueAndExecute))
    }
}

pub struct FactCheckTask {
    checker: FactChecker,
    observer: Arc<dyn ExecutionObserver>,
}

impl FactCheckTask {
    pub fn new(observer: Arc<dyn ExecutionObserver>) -> Self {
        Self {
            checker: FactChecker::default(),
            observer,
        }
    }
}

#[async_trait]
impl Task for FactCheckTask {
    fn id(&self) -> &str {
        FACT_CHECK_TASK_ID
    }

    #[instrument(name = "task.fact_check", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let documents: Vec<Document> = context
            .get("research.documents")
            .await
            .unwrap_or_default();
        let mut claims: Vec<Claim> = context.get("research.claims").await.unwrap_or_default();

        self.observer.on_start(
            "Cross-Reference Specialist",
            &format!(
                "Cross-verify {} claims against {} sources",
                claims.len(),
                documents.len()
            ),
        );

        for claim in claims.iter_mut() {
            self.observer.on_tool_start("fact_checker", &claim.text);
            let result = self.checker.check(claim, &documents);
            self.observer.on_tool_end(
                "fact_checker",
                &format!("{} ({} sources)", result.confidence.as_str(), result.sources_checked),
            );
            factcheck::apply(claim, result);
        }

        let verified = claims
            .iter()
            .filter(|claim| claim.confidence == ConfidenceLevel::Verified)
            .count();
        info!(claims = claims.len(), verified, "fact check finished");

        context.set("research.claims", &claims).await;
        context.set("research.fact_checked", true).await;

        let summary = format!("Fact-checked {} claims, {verified} verified", claims.len());
        self.observer
            .on_complete(TaskOutput::new(FACT_CHECK_TASK_ID, summary.clone()));

        Ok(TaskResult::new(Some(summary), NextAction::ContinueAndExecute))
    }
}

pub struct SynthesisTask {
    observer: Arc<dyn ExecutionObserver>,
}

impl SynthesisTask {
    pub fn new(observer: Arc<dyn ExecutionObserver>) -> Self {
        Self { observer }
    }
}

#[async_trait]
impl Task for SynthesisTask {
    fn id(&self) -> &str {
        SYNTHESIS_TASK_ID
    }

    #[instrument(name = "task.synthesis", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let inputs = load_inputs(&context).await?;
        let iteration: u32 = context.get("phase.iteration").await.unwrap_or(0);
        let documents: Vec<Document> = context
            .get("research.documents")
            .await
            .unwrap_or_default();
        let claims: Vec<Claim> = context.get("research.claims").await.unwrap_or_default();
        let fact_checked: bool = context
            .get("research.fact_checked")
            .await
            .unwrap_or(false);

        self.observer.on_start(
            "Senior Analyst",
            &format!("Synthesize findings for \"{}\"", inputs.query),
        );

        let min_sources = inputs.quality.min_sources_per_claim as usize;
        let corroborated_claims = claims
            .iter()
            .filter(|claim| {
                matches!(
                    claim.confidence,
                    ConfidenceLevel::Verified | ConfidenceLevel::PartiallyVerified
                ) && claim.supporting_sources() >= min_sources
            })
            .count();
        let contradicted_claims = claims
            .iter()
            .filter(|claim| claim.confidence == ConfidenceLevel::Contradicted)
            .count();

        let mut ranked: Vec<&Claim> = claims.iter().collect();
        ranked.sort_by_key(|claim| std::cmp::Reverse(claim.supporting_sources()));
        let key_findings = ranked
            .into_iter()
            .take(KEY_FINDINGS)
            .map(|claim| claim.text.clone())
            .collect();

        let mut synthesis = Synthesis {
            query: inputs.query.clone(),
            iteration,
            documents,
            claims,
            fact_checked,
            corroborated_claims,
            contradicted_claims,
            coverage: 0.0,
            score: 0.0,
            key_findings,
        };
        let (coverage, score) = quality_score(&synthesis, &inputs);
        synthesis.coverage = coverage;
        synthesis.score = score;

        self.observer.on_step(StepOutput::Finish(synthesis.summary_line()));
        info!(
            iteration,
            score,
            coverage,
            corroborated = corroborated_claims,
            "synthesis computed quality score"
        );

        let summary = synthesis.summary_line();
        context.set("synthesis.output", &synthesis).await;
        self.observer
            .on_complete(TaskOutput::new(SYNTHESIS_TASK_ID, summary.clone()));

        Ok(TaskResult::new(Some(summary), NextAction::End))
    }
}

pub struct ReportTask {
    observer: Arc<dyn ExecutionObserver>,
}

impl ReportTask {
    pub fn new(observer: Arc<dyn ExecutionObserver>) -> Self {
        Self { observer }
    }
}

#[async_trait]
impl Task for ReportTask {
    fn id(&self) -> &str {
        REPORT_TASK_ID
    }

    #[instrument(name = "task.report", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let inputs = load_inputs(&context).await?;
        let synthesis: Synthesis = context
            .get("previous.synthesis")
            .await
            .unwrap_or_else(|| Synthesis {
                query: inputs.query.clone(),
                ..Synthesis::default()
            });

        self.observer.on_start(
            "Report Composer",
            &format!("Write the research report for \"{}\"", inputs.query),
        );

        let report = render_report(&synthesis, &inputs);
        context.set("report.text", report.clone()).await;

        info!(bytes = report.len(), "report composed");
        self.observer
            .on_complete(TaskOutput::new(REPORT_TASK_ID, report.clone()));

        Ok(TaskResult::new(Some(report), NextAction::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QualityControl;

    fn inputs(depth_level: u8, max_docs: u32) -> ResearchInputs {
        ResearchInputs::new("grid storage").with_max_docs(max_docs).with_quality(QualityControl {
            depth_level,
            ..QualityControl::default()
        })
    }

    #[test]
    fn pass_size_follows_depth_and_cap() {
        assert_eq!(documents_per_pass(&inputs(3, 10)), 4);
        assert_eq!(documents_per_pass(&inputs(5, 3)), 3);
    }

    #[test]
    fn score_blends_corroboration_and_coverage() {
        let docs = vec![
            Document {
                document_id: "d".into(),
                title: "t".into(),
                url: "u".into(),
                source_type: "web".into(),
                authors: vec![],
                published: None,
                text: String::new(),
            };
            3
        ];
        let claim: Claim = serde_json::from_value(serde_json::json!({
            "claim_id": "c",
            "text": "claim",
            "claim_type": "numerical",
            "provenance": {
                "source_id": "d",
                "source_type": "web",
                "extracted_at": "2024-01-01T00:00:00Z"
            }
        }))
        .unwrap();

        let mut synthesis = Synthesis {
            documents: docs,
            claims: vec![claim.clone(), claim],
            fact_checked: true,
            corroborated_claims: 1,
            ..Synthesis::default()
        };

        let (coverage, score) = quality_score(&synthesis, &inputs(3, 10));
        assert!((coverage - 0.5).abs() < 1e-9);
        assert!((score - (0.6 * 0.5 + 0.4 * 0.5)).abs() < 1e-9);

        synthesis.fact_checked = false;
        let (_, score) = quality_score(&synthesis, &inputs(3, 10));
        assert!((score - 0.5).abs() < 1e-9);

        synthesis.claims.clear();
        let (_, score) = quality_score(&synthesis, &inputs(3, 10));
        assert_eq!(score, 0.0);
    }
}
