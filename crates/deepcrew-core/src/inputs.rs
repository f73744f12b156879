use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::DeepCrewError;

/// Upper bound on refinement passes accepted from a request.
pub const MAX_REFINEMENT_ITERATIONS: u32 = 10;

/// Quality-control knobs of a research request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityControl {
    /// 1 = basic, 3 = standard, 5 = exhaustive.
    pub depth_level: u8,
    pub quality_threshold: f64,
    pub enable_fact_checking: bool,
    pub enable_iterative_refinement: bool,
    pub max_iterations: u32,
    pub min_sources_per_claim: u32,
}

impl Default for QualityControl {
    fn default() -> Self {
        Self {
            depth_level: 3,
            quality_threshold: 0.7,
            enable_fact_checking: true,
            enable_iterative_refinement: true,
            max_iterations: 2,
            min_sources_per_claim: 2,
        }
    }
}

impl QualityControl {
    pub fn validate(&self) -> Result<(), DeepCrewError> {
        if !(1..=5).contains(&self.depth_level) {
            return Err(DeepCrewError::validation(format!(
                "depth_level must be between 1 and 5, got {}",
                self.depth_level
            )));
        }
        if !self.quality_threshold.is_finite() || !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(DeepCrewError::validation(format!(
                "quality_threshold must be within [0, 1], got {}",
                self.quality_threshold
            )));
        }
        if self.max_iterations > MAX_REFINEMENT_ITERATIONS {
            return Err(DeepCrewError::validation(format!(
                "max_iterations must not exceed {MAX_REFINEMENT_ITERATIONS}, got {}",
                self.max_iterations
            )));
        }
        if self.min_sources_per_claim == 0 {
            return Err(DeepCrewError::validation(
                "min_sources_per_claim must be at least 1",
            ));
        }
        Ok(())
    }
}

/// A research request as handed to the phase controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchInputs {
    pub query: String,
    pub start_date: String,
    pub end_date: String,
    pub sources: String,
    pub max_docs: u32,
    pub quality: QualityControl,
}

impl ResearchInputs {
    pub const DEFAULT_START_DATE: &'static str = "2020-01-01";
    pub const DEFAULT_SOURCES: &'static str = "papers, web";
    pub const DEFAULT_MAX_DOCS: u32 = 10;

    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            start_date: Self::DEFAULT_START_DATE.to_string(),
            end_date: default_end_date(),
            sources: Self::DEFAULT_SOURCES.to_string(),
            max_docs: Self::DEFAULT_MAX_DOCS,
            quality: QualityControl::default(),
        }
    }

    pub fn with_quality(mut self, quality: QualityControl) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_max_docs(mut self, max_docs: u32) -> Self {
        self.max_docs = max_docs;
        self
    }

    pub fn with_dates(mut self, start: Option<String>, end: Option<String>) -> Self {
        if let Some(start) = start.filter(|value| !value.trim().is_empty()) {
            self.start_date = start;
        }
        if let Some(end) = end.filter(|value| !value.trim().is_empty()) {
            self.end_date = end;
        }
        self
    }

    pub fn with_sources(mut self, sources: Option<String>) -> Self {
        if let Some(sources) = sources.filter(|value| !value.trim().is_empty()) {
            self.sources = sources;
        }
        self
    }

    /// Reject the request before any phase starts.
    pub fn validate(&self) -> Result<(), DeepCrewError> {
        if self.query.trim().is_empty() {
            return Err(DeepCrewError::validation("query must not be empty"));
        }
        if self.max_docs == 0 {
            return Err(DeepCrewError::validation("max_docs must be at least 1"));
        }
        self.quality.validate()
    }

    /// Flat input mapping handed to executors.
    pub fn input_map(&self) -> Map<String, Value> {
        let value = json!({
            "query": self.query,
            "start_date": self.start_date,
            "end_date": self.end_date,
            "sources": self.sources,
            "max_docs": self.max_docs,
            "depth_level": self.quality.depth_level,
            "quality_threshold": self.quality.quality_threshold,
            "enable_fact_checking": self.quality.enable_fact_checking,
            "enable_iterative_refinement": self.quality.enable_iterative_refinement,
            "max_iterations": self.quality.max_iterations,
            "min_sources_per_claim": self.quality.min_sources_per_claim,
        });
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

fn default_end_date() -> String {
    format!("{}-12-31", Utc::now().year())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_standard_depth() {
        let inputs = ResearchInputs::new("transformer efficacy");
        assert_eq!(inputs.quality.depth_level, 3);
        assert_eq!(inputs.quality.max_iterations, 2);
        assert!(inputs.end_date.ends_with("-12-31"));
        assert!(inputs.validate().is_ok());
    }

    #[test]
    fn rejects_blank_query_and_out_of_range_quality() {
        assert!(matches!(
            ResearchInputs::new("   ").validate(),
            Err(DeepCrewError::Validation(_))
        ));

        let mut quality = QualityControl {
            quality_threshold: 1.5,
            ..QualityControl::default()
        };
        assert!(quality.validate().is_err());

        quality.quality_threshold = 0.5;
        quality.depth_level = 0;
        assert!(quality.validate().is_err());

        quality.depth_level = 5;
        quality.min_sources_per_claim = 0;
        assert!(quality.validate().is_err());
    }

    #[test]
    fn input_map_exposes_quality_parameters() {
        let map = ResearchInputs::new("q").input_map();
        assert_eq!(map["query"], "q");
        assert_eq!(map["enable_fact_checking"], true);
        assert_eq!(map["min_sources_per_claim"], 2);
    }

    #[test]
    fn blank_overrides_keep_defaults() {
        let inputs = ResearchInputs::new("q")
            .with_dates(Some(" ".into()), Some("2023-06-30".into()))
            .with_sources(None);
        assert_eq!(inputs.start_date, ResearchInputs::DEFAULT_START_DATE);
        assert_eq!(inputs.end_date, "2023-06-30");
        assert_eq!(inputs.sources, ResearchInputs::DEFAULT_SOURCES);
    }
}
