use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A research document gathered during a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub url: String,
    pub source_type: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub published: Option<String>,
    pub text: String,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Return up to `limit` documents for `query`, skipping the first `offset` hits.
    async fn search(&self, query: &str, limit: usize, offset: usize)
    -> anyhow::Result<Vec<Document>>;
}

struct Template {
    title: &'static str,
    source_type: &'static str,
    authors: &'static [&'static str],
    published: &'static str,
    body: &'static str,
}

const TEMPLATES: &[Template] = &[
    Template {
        title: "Survey of {query}",
        source_type: "academic_paper",
        authors: &["Smith, J.", "Doe, A."],
        published: "2022-03-14",
        body: "Recent studies of {query} report that adoption improved by 18% across surveyed regions. \
               Researchers compared to earlier baselines found consistent efficiency gains for {query}. \
               We found that {query} benefits depend strongly on input data quality.",
    },
    Template {
        title: "Benchmarking {query}",
        source_type: "academic_paper",
        authors: &["Chen, L."],
        published: "2023-01-09",
        body: "Benchmark results show that {query} outperforms traditional approaches on standard evaluation suites. \
               The accuracy of leading {query} methods reached 0.91 on held-out data. \
               Independent groups observed that {query} improved efficiency by 12% compared to prior baselines.",
    },
    Template {
        title: "Market analysis: {query}",
        source_type: "web",
        authors: &[],
        published: "2024-05-20",
        body: "Industry analysts estimate that spending on {query} increased by 24% year over year. \
               Analysts observed that {query} growth remains faster than the overall market across surveyed regions. \
               Supply constraints continue to shape adoption and efficiency of {query}.",
    },
    Template {
        title: "Methodology review for {query}",
        source_type: "academic_paper",
        authors: &["Okafor, N.", "Lindqvist, E."],
        published: "2023-09-02",
        body: "We propose a framework to evaluate {query} with reproducible benchmarks. \
               It follows that evaluation protocols for {query} must control for dataset overlap. \
               Our experiment shows that reported results on {query} vary by 9% between laboratories.",
    },
    Template {
        title: "Critical perspectives on {query}",
        source_type: "web",
        authors: &["Garcia, M."],
        published: "2024-02-11",
        body: "Several replications did not confirm the headline results reported for {query}. \
               Contrary to early reports, one evaluation found no significant improvement of {query} over baselines. \
               Reviewers argue that {query} studies often lack independent benchmarks.",
    },
    Template {
        title: "Longitudinal data on {query}",
        source_type: "academic_paper",
        authors: &["Tanaka, H."],
        published: "2021-11-30",
        body: "Longitudinal studies of {query} observed that error rates decreased by 15% over five years. \
               The results indicate that {query} adoption correlates with improved efficiency across surveyed regions. \
               Further evaluation of {query} across regions is still required.",
    },
    Template {
        title: "Practitioner report: {query}",
        source_type: "web",
        authors: &[],
        published: "2024-08-01",
        body: "Practitioners report that {query} deployments exceed expectations in most surveyed organisations. \
               Teams that adopted {query} improved delivery time by 20% compared to manual processes. \
               Remaining risks for {query} centre on governance and cost.",
    },
    Template {
        title: "Theoretical foundations of {query}",
        source_type: "academic_paper",
        authors: &["Novak, P.", "Haddad, R."],
        published: "2020-06-18",
        body: "This hypothesis explains why {query} scales with available data and improved efficiency. \
               It can be shown that {query} performance saturates without higher quality inputs. \
               Empirical benchmarks of {query} support the predicted saturation point.",
    },
];

/// Offline document source that renders a fixed set of templates around the query.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticCorpus;

impl StaticCorpus {
    pub fn new() -> Self {
        Self
    }

    pub fn len(&self) -> usize {
        TEMPLATES.len()
    }

    pub fn is_empty(&self) -> bool {
        TEMPLATES.is_empty()
    }
}

#[async_trait]
impl DocumentSource for StaticCorpus {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Document>> {
        let topic = query.trim();
        Ok(TEMPLATES
            .iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(index, template)| Document {
                document_id: format!("doc-{}", index + 1),
                title: template.title.replace("{query}", topic),
                url: format!("https://example.com/research/{}", index + 1),
                source_type: template.source_type.to_string(),
                authors: template.authors.iter().map(|a| a.to_string()).collect(),
                published: Some(template.published.to_string()),
                text: template.body.replace("{query}", topic),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_through_templates() {
        let corpus = StaticCorpus::new();
        let first = corpus.search("solid-state batteries", 3, 0).await.unwrap();
        let second = corpus.search("solid-state batteries", 3, 3).await.unwrap();
        let tail = corpus.search("solid-state batteries", 10, corpus.len()).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second[0].document_id, "doc-4");
        assert!(first[0].text.contains("solid-state batteries"));
        assert!(tail.is_empty());
    }
}
