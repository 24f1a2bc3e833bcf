//! Precision@1 and Mean Reciprocal Rank over ranked results.
//!
//! Pure functions of already-ranked output; nothing here touches ranking state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RankError, RankResult};
use crate::model::types::{Query, RankedResult};

/// `1/rank` of the first entry matching `expected` within the top `k`, else 0.
pub fn reciprocal_rank(result: &RankedResult, expected: &str, k: usize) -> f64 {
    result.rank_of(expected, k).map_or(0.0, |rank| 1.0 / rank as f64)
}

/// Whether the top-ranked title matches `expected`.
pub fn correct_at_1(result: &RankedResult, expected: &str) -> bool {
    result.rank_of(expected, 1).is_some()
}

/// Outcome for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub clue: String,
    pub expected: Option<String>,
    pub top_title: Option<String>,
    /// 1-based rank of the expected title within the cut-off.
    pub rank: Option<usize>,
    pub candidates: usize,
}

/// Aggregate metrics for a query batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub queries: usize,
    pub top_k: usize,
    pub correct_at_1: usize,
    pub precision_at_1: f64,
    pub mrr: f64,
    /// Queries that produced no candidates.
    pub empty_results: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<QueryOutcome>,
}

impl EvaluationReport {
    /// Score `results` (aligned with `queries`) against each query's expected
    /// title. Queries without an expected title count as misses.
    pub fn compute(queries: &[Query], results: &[RankedResult], top_k: usize) -> RankResult<Self> {
        if queries.len() != results.len() {
            return Err(RankError::ResultCountMismatch {
                queries: queries.len(),
                results: results.len(),
            });
        }
        let mut correct = 0usize;
        let mut rr_sum = 0.0;
        let mut empty_results = 0usize;
        let mut outcomes = Vec::with_capacity(queries.len());

        for (query, result) in queries.iter().zip(results) {
            if result.is_empty() {
                empty_results += 1;
            }
            let rank = query
                .expected_title
                .as_deref()
                .and_then(|expected| result.rank_of(expected, top_k));
            if rank == Some(1) {
                correct += 1;
            }
            rr_sum += rank.map_or(0.0, |r| 1.0 / r as f64);
            outcomes.push(QueryOutcome {
                clue: query.clue_text.clone(),
                expected: query.expected_title.clone(),
                top_title: result.top_title().map(str::to_string),
                rank,
                candidates: result.len(),
            });
        }

        let n = queries.len();
        let (precision_at_1, mrr) = if n == 0 {
            (0.0, 0.0)
        } else {
            (correct as f64 / n as f64, rr_sum / n as f64)
        };

        Ok(Self {
            queries: n,
            top_k,
            correct_at_1: correct,
            precision_at_1,
            mrr,
            empty_results,
            outcomes,
        })
    }

    /// Drop per-query outcomes, keeping the aggregate.
    pub fn summary(mut self) -> Self {
        self.outcomes.clear();
        self
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Precision@1: {:.4}", self.precision_at_1)?;
        write!(f, "MRR:         {:.4}", self.mrr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::RankedEntry;

    fn ranked(titles: &[&str]) -> RankedResult {
        RankedResult {
            entries: titles
                .iter()
                .enumerate()
                .map(|(i, t)| RankedEntry {
                    doc_id: i,
                    title: t.to_string(),
                    probability: 1.0 - i as f64 * 0.1,
                })
                .collect(),
        }
    }

    fn query(expected: &str) -> Query {
        Query::new("cities", "clue").with_expected(expected)
    }

    #[test]
    fn reciprocal_rank_respects_cutoff() {
        let r = ranked(&["Lyon", "Paris", "Nice"]);
        assert_eq!(reciprocal_rank(&r, "paris", 10), 0.5);
        assert_eq!(reciprocal_rank(&r, "Nice", 2), 0.0);
        assert_eq!(reciprocal_rank(&r, "Marseille", 10), 0.0);
        assert!(correct_at_1(&r, "LYON"));
        assert!(!correct_at_1(&RankedResult::empty(), "Lyon"));
    }

    #[test]
    fn report_aggregates_queries() {
        let queries = vec![query("Paris"), query("Paris"), query("Rhine")];
        let results = vec![
            ranked(&["Paris", "Lyon"]),
            ranked(&["Lyon", "Nice", "Paris"]),
            RankedResult::empty(),
        ];
        let report = EvaluationReport::compute(&queries, &results, 10).unwrap();
        assert_eq!(report.queries, 3);
        assert_eq!(report.correct_at_1, 1);
        assert_eq!(report.empty_results, 1);
        assert!((report.precision_at_1 - 1.0 / 3.0).abs() < 1e-12);
        assert!((report.mrr - (1.0 + 1.0 / 3.0) / 3.0).abs() < 1e-12);
        assert_eq!(report.outcomes[1].rank, Some(3));
        assert!(report.precision_at_1 <= report.mrr);
    }

    #[test]
    fn empty_batch_scores_zero() {
        let report = EvaluationReport::compute(&[], &[], 10).unwrap();
        assert_eq!(report.precision_at_1, 0.0);
        assert_eq!(report.mrr, 0.0);
    }

    #[test]
    fn misaligned_results_are_rejected() {
        let queries = vec![query("Paris"), query("Lyon")];
        let err = EvaluationReport::compute(&queries, &[ranked(&["Paris"])], 10).unwrap_err();
        assert!(matches!(
            err,
            RankError::ResultCountMismatch {
                queries: 2,
                results: 1
            }
        ));
        assert!(!err.is_configuration());
    }

    #[test]
    fn display_matches_harness_format() {
        let report = EvaluationReport::compute(&[query("Paris")], &[ranked(&["Paris"])], 10).unwrap();
        assert_eq!(report.to_string(), "Precision@1: 1.0000\nMRR:         1.0000");
    }

    #[test]
    fn summary_serializes_without_outcomes() {
        let report = EvaluationReport::compute(&[query("Paris")], &[ranked(&["Paris"])], 10)
            .unwrap()
            .summary();
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("outcomes"));
        let back: EvaluationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
