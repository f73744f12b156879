use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ResearchInputs;
use crate::claims::ConfidenceLevel;
use crate::error::DeepCrewError;
use crate::events::truncate_chars;
use crate::tasks::Synthesis;

/// Render the markdown research report for a synthesis.
pub fn render_report(synthesis: &Synthesis, inputs: &ResearchInputs) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Research Report: {}", inputs.query);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "_Period: {} to {} | Sources: {} | Depth level: {}_",
        inputs.start_date, inputs.end_date, inputs.sources, inputs.quality.depth_level
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Executive Summary");
    let _ = writeln!(out);
    if synthesis.documents.is_empty() {
        let _ = writeln!(out, "No sources were found for this query.");
    } else {
        let _ = writeln!(
            out,
            "This report reviews {} sources and {} extracted claims. {} claims are corroborated by at least {} independent sources and {} are contradicted.",
            synthesis.documents.len(),
            synthesis.claims.len(),
            synthesis.corroborated_claims,
            inputs.quality.min_sources_per_claim,
            synthesis.contradicted_claims
        );
    }
    let _ = writeln!(out);

    if !synthesis.key_findings.is_empty() {
        let _ = writeln!(out, "## Key Findings");
        let _ = writeln!(out);
        for finding in &synthesis.key_findings {
            let _ = writeln!(out, "- {finding}");
        }
        let _ = writeln!(out);
    }

    if synthesis.fact_checked && !synthesis.claims.is_empty() {
        let _ = writeln!(out, "## Verification");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Claim | Confidence | Supporting sources |");
        let _ = writeln!(out, "|---|---|---|");
        for claim in &synthesis.claims {
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                truncate_chars(&claim.text, 80).replace('|', "/"),
                claim.confidence.as_str(),
                claim.supporting_sources()
            );
        }
        let _ = writeln!(out);

        let disputed: Vec<_> = synthesis
            .claims
            .iter()
            .filter(|claim| claim.confidence == ConfidenceLevel::Contradicted)
            .collect();
        if !disputed.is_empty() {
            let _ = writeln!(out, "### Disputed Claims");
            let _ = writeln!(out);
            for claim in disputed {
                let _ = writeln!(out, "- {} ({})", claim.text, claim.provenance.source_id);
            }
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "## Methodology");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Refinement passes: {}. Fact checking: {}. Quality score: {:.2} (threshold {:.2}, coverage {:.2}).",
        synthesis.iteration,
        if synthesis.fact_checked {
            "enabled"
        } else {
            "disabled"
        },
        synthesis.score,
        inputs.quality.quality_threshold,
        synthesis.coverage
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Sources");
    let _ = writeln!(out);
    for (index, doc) in synthesis.documents.iter().enumerate() {
        let published = doc.published.as_deref().unwrap_or("n.d.");
        if doc.authors.is_empty() {
            let _ = writeln!(out, "{}. {} ({published}) <{}>", index + 1, doc.title, doc.url);
        } else {
            let _ = writeln!(
                out,
                "{}. {}: {} ({published}) <{}>",
                index + 1,
                doc.authors.join("; "),
                doc.title,
                doc.url
            );
        }
    }

    out
}

/// Write `report` to `<dir>/<run_id>.md`, creating `dir` when needed.
pub fn persist_report(dir: &Path, run_id: &str, report: &str) -> Result<PathBuf, DeepCrewError> {
    fs::create_dir_all(dir).map_err(|err| DeepCrewError::io(dir, err))?;
    let path = dir.join(format!("{run_id}.md"));
    fs::write(&path, report).map_err(|err| DeepCrewError::io(&path, err))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;

    fn synthesis() -> Synthesis {
        Synthesis {
            query: "heat pumps".into(),
            documents: vec![Document {
                document_id: "doc-1".into(),
                title: "Survey of heat pumps".into(),
                url: "https://example.com/research/1".into(),
                source_type: "academic_paper".into(),
                authors: vec!["Smith, J.".into()],
                published: Some("2022-03-14".into()),
                text: String::new(),
            }],
            key_findings: vec!["Heat pumps cut emissions by 40%.".into()],
            score: 0.5,
            coverage: 0.5,
            ..Synthesis::default()
        }
    }

    #[test]
    fn report_lists_findings_and_sources() {
        let report = render_report(&synthesis(), &ResearchInputs::new("heat pumps"));

        assert!(report.starts_with("# Research Report: heat pumps"));
        assert!(report.contains("- Heat pumps cut emissions by 40%."));
        assert!(report.contains("1. Smith, J.: Survey of heat pumps (2022-03-14)"));
        assert!(report.contains("Quality score: 0.50"));
        assert!(!report.contains("## Verification"));
    }

    #[test]
    fn persists_report_under_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("reports");

        let path = persist_report(&target, "run-42", "# Report").unwrap();

        assert_eq!(path, target.join("run-42.md"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# Report");
    }
}
