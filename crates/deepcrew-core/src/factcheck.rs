//! Cross-reference claims against the documents gathered for a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claims::{Claim, ConfidenceLevel, Evidence, Provenance};
use crate::corpus::Document;
use crate::events::truncate_chars;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "can", "that", "this",
    "these", "those", "we", "our", "they", "their",
];
const CONTRADICTION_MARKERS: &[&str] = &[
    "did not confirm",
    "contrary to",
    "no significant",
    "failed to replicate",
    "could not reproduce",
];
const MAX_QUERY_TERMS: usize = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub claim_id: String,
    pub confidence: ConfidenceLevel,
    pub evidence: Vec<Evidence>,
    pub sources_checked: usize,
    pub search_query: String,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct FactChecker {
    max_sources: usize,
    relevance_floor: f64,
}

impl Default for FactChecker {
    fn default() -> Self {
        Self {
            max_sources: 5,
            relevance_floor: 0.3,
        }
    }
}

impl FactChecker {
    /// Verify `claim` against every document except the one it came from.
    pub fn check(&self, claim: &Claim, documents: &[Document]) -> FactCheckResult {
        let search_query = search_query(&claim.text);
        let terms: Vec<&str> = search_query.split_whitespace().collect();

        let mut scored: Vec<(f64, &Document)> = documents
            .iter()
            .filter(|doc| doc.document_id != claim.provenance.source_id)
            .map(|doc| (relevance(&terms, &doc.text), doc))
            .filter(|(score, _)| *score >= self.relevance_floor)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let evidence: Vec<Evidence> = scored
            .into_iter()
            .take(self.max_sources)
            .map(|(relevance_score, doc)| Evidence {
                text: format!("{}. {}...", doc.title, truncate_chars(&doc.text, 200)),
                provenance: Provenance::for_document(doc),
                relevance_score,
                supports_claim: !contradicts(&doc.text),
            })
            .collect();

        FactCheckResult {
            claim_id: claim.claim_id.clone(),
            confidence: determine_confidence(&evidence),
            sources_checked: evidence.len(),
            evidence,
            search_query,
            verified_at: Utc::now(),
        }
    }
}

/// Key terms of a claim: stop words and short words removed, first seven kept.
pub fn search_query(claim_text: &str) -> String {
    claim_text
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
                .to_lowercase()
        })
        .filter(|word| word.chars().count() > 3 && !STOP_WORDS.contains(&word.as_str()))
        .take(MAX_QUERY_TERMS)
        .collect::<Vec<_>>()
        .join(" ")
}

fn relevance(terms: &[&str], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let hits = terms.iter().filter(|term| haystack.contains(*term)).count();
    hits as f64 / terms.len() as f64
}

fn contradicts(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONTRADICTION_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

pub fn determine_confidence(evidence: &[Evidence]) -> ConfidenceLevel {
    if evidence.is_empty() {
        return ConfidenceLevel::Unknown;
    }

    let supporting = evidence.iter().filter(|e| e.supports_claim).count();
    let contradicting = evidence.len() - supporting;
    let mean_relevance =
        evidence.iter().map(|e| e.relevance_score).sum::<f64>() / evidence.len() as f64;

    if supporting >= 3 && mean_relevance >= 0.6 {
        ConfidenceLevel::Verified
    } else if supporting >= 2 && contradicting == 0 {
        ConfidenceLevel::PartiallyVerified
    } else if contradicting > supporting {
        ConfidenceLevel::Contradicted
    } else {
        ConfidenceLevel::Unknown
    }
}

/// Fold a fact-check result back into its claim.
pub fn apply(claim: &mut Claim, result: FactCheckResult) {
    claim.confidence = result.confidence;
    claim.evidence = result.evidence;
    claim.verified_at = Some(result.verified_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimExtractor;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            document_id: id.into(),
            title: format!("Title {id}"),
            url: format!("https://example.com/{id}"),
            source_type: "web".into(),
            authors: vec![],
            published: None,
            text: text.into(),
        }
    }

    fn evidence(relevance: f64, supports: bool) -> Evidence {
        Evidence {
            text: "x".into(),
            provenance: Provenance::for_document(&doc("e", "x")),
            relevance_score: relevance,
            supports_claim: supports,
        }
    }

    #[test]
    fn search_query_drops_stop_words() {
        assert_eq!(
            search_query("The transformer models were better than RNNs, on the GLUE benchmark."),
            "transformer models better than rnns glue benchmark"
        );
    }

    #[test]
    fn confidence_rules() {
        assert_eq!(determine_confidence(&[]), ConfidenceLevel::Unknown);
        assert_eq!(
            determine_confidence(&[evidence(0.7, true), evidence(0.8, true), evidence(0.6, true)]),
            ConfidenceLevel::Verified
        );
        assert_eq!(
            determine_confidence(&[evidence(0.4, true), evidence(0.4, true)]),
            ConfidenceLevel::PartiallyVerified
        );
        assert_eq!(
            determine_confidence(&[evidence(0.9, false), evidence(0.9, false), evidence(0.9, true)]),
            ConfidenceLevel::Contradicted
        );
        assert_eq!(
            determine_confidence(&[evidence(0.4, true), evidence(0.4, false)]),
            ConfidenceLevel::Unknown
        );
    }

    #[test]
    fn cross_references_other_documents() {
        let source = doc(
            "a",
            "Results show that battery recycling lowers lithium extraction costs considerably.",
        );
        let documents = vec![
            source.clone(),
            doc("b", "Battery recycling lowers lithium extraction costs in every region."),
            doc("c", "Independent audits confirm battery recycling lowers extraction costs."),
            doc("d", "Contrary to claims, battery recycling showed no significant savings."),
            doc("e", "Unrelated article about gardening tools and seasonal planting."),
        ];
        let claim = ClaimExtractor::default().extract(&source).claims.remove(0);

        let result = FactChecker::default().check(&claim, &documents);

        assert_eq!(result.sources_checked, 3);
        assert!(result.evidence.iter().all(|e| e.provenance.source_id != "a"));
        assert!(result.evidence.iter().all(|e| e.provenance.source_id != "e"));
        let contradicting: Vec<_> = result
            .evidence
            .iter()
            .filter(|e| !e.supports_claim)
            .map(|e| e.provenance.source_id.as_str())
            .collect();
        assert_eq!(contradicting, vec!["d"]);
    }
}
