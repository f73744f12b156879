//! Heuristic claim extraction with provenance tracking.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::corpus::Document;

static SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s+").expect("invalid sentence regex"));
static PERCENTAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.?\d*)\s*%").expect("invalid percentage regex"));
static COMPARATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"better than|worse than|faster than|slower than|outperform|surpass|exceed|compared to|in comparison|versus|vs\.",
    )
    .expect("invalid comparative regex")
});
static EXPERIMENTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"we (?:found|observed|discovered|showed|demonstrated)|results? (?:show|indicate|suggest|reveal)|experiment|evaluation|test|benchmark",
    )
    .expect("invalid experimental regex")
});
static THEORETICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"we (?:propose|introduce|present|define)|theorem|lemma|proposition|hypothesis|can be shown|it follows that|therefore",
    )
    .expect("invalid theoretical regex")
});
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").expect("invalid entity regex")
});
static NAMED_METRIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(accuracy|precision|recall|f1|error|rate)[\s:=]+(\d+\.?\d*)")
        .expect("invalid metric regex")
});

const ENTITY_STOPWORDS: &[&str] = &["The", "This", "That", "These", "Those", "We", "Our"];
const MAX_ENTITIES: usize = 10;
const MIN_SENTENCE_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Experimental,
    Theoretical,
    Comparative,
    Numerical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Verified,
    PartiallyVerified,
    Contradicted,
    #[default]
    Unknown,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Verified => "verified",
            ConfidenceLevel::PartiallyVerified => "partially_verified",
            ConfidenceLevel::Contradicted => "contradicted",
            ConfidenceLevel::Unknown => "unknown",
        }
    }
}

/// Where a claim or a piece of evidence came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(usize, usize)>,
    pub extracted_at: DateTime<Utc>,
}

impl Provenance {
    pub fn for_document(document: &Document) -> Self {
        Self {
            source_id: document.document_id.clone(),
            source_type: document.source_type.clone(),
            source_url: Some(document.url.clone()),
            paragraph: None,
            line_range: None,
            extracted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    pub provenance: Provenance,
    pub relevance_score: f64,
    pub supports_claim: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimMetrics {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub percentages: Vec<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub text: String,
    pub claim_type: ClaimType,
    pub provenance: Provenance,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub metrics: ClaimMetrics,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub confidence: ConfidenceLevel,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn supporting_sources(&self) -> usize {
        self.evidence.iter().filter(|e| e.supports_claim).count()
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub claims: Vec<Claim>,
    pub sentences_analyzed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ClaimExtractor {
    max_claims: usize,
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self { max_claims: 20 }
    }
}

impl ClaimExtractor {
    pub fn new(max_claims: usize) -> Self {
        Self { max_claims }
    }

    pub fn extract(&self, document: &Document) -> ExtractionReport {
        let sentences = split_sentences(&document.text);
        let mut claims = Vec::new();

        for (index, sentence) in sentences.iter().enumerate() {
            if claims.len() >= self.max_claims {
                break;
            }
            let Some(claim_type) = classify(sentence) else {
                continue;
            };

            let mut provenance = Provenance::for_document(document);
            provenance.paragraph = Some(index / 5);
            provenance.line_range = Some((index, index));

            claims.push(Claim {
                claim_id: format!("{}_claim_{}", document.document_id, claims.len() + 1),
                text: sentence.to_string(),
                claim_type,
                provenance,
                entities: extract_entities(sentence),
                metrics: extract_metrics(sentence),
                context: Some(context_window(&sentences, index)),
                confidence: ConfidenceLevel::Unknown,
                evidence: Vec::new(),
                verified_at: None,
            });
        }

        ExtractionReport {
            claims,
            sentences_analyzed: sentences.len(),
        }
    }
}

pub fn split_sentences(text: &str) -> Vec<&str> {
    SENTENCE_BREAK
        .split(text)
        .map(str::trim)
        .filter(|sentence| sentence.chars().count() > MIN_SENTENCE_CHARS)
        .collect()
}

pub fn classify(sentence: &str) -> Option<ClaimType> {
    if PERCENTAGE.is_match(sentence) {
        return Some(ClaimType::Numerical);
    }

    let lower = sentence.to_lowercase();
    if COMPARATIVE.is_match(&lower) {
        Some(ClaimType::Comparative)
    } else if EXPERIMENTAL.is_match(&lower) {
        Some(ClaimType::Experimental)
    } else if THEORETICAL.is_match(&lower) {
        Some(ClaimType::Theoretical)
    } else {
        None
    }
}

fn extract_entities(sentence: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    for found in ENTITY.find_iter(sentence) {
        let entity = found.as_str();
        if ENTITY_STOPWORDS.contains(&entity) || entities.iter().any(|e| e == entity) {
            continue;
        }
        entities.push(entity.to_string());
        if entities.len() == MAX_ENTITIES {
            break;
        }
    }
    entities
}

fn extract_metrics(sentence: &str) -> ClaimMetrics {
    let percentages = PERCENTAGE
        .captures_iter(sentence)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .collect();

    let named = NAMED_METRIC
        .captures_iter(sentence)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_lowercase();
            let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
            Some((name, value))
        })
        .collect();

    ClaimMetrics { percentages, named }
}

fn context_window(sentences: &[&str], index: usize) -> String {
    let start = index.saturating_sub(1);
    let end = (index + 2).min(sentences.len());
    sentences[start..end].join(" ")
}
