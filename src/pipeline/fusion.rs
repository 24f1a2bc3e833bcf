//! Candidate fusion: dense-first union of dense and lexical top-k lists.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::model::types::DocId;

/// Top-`k` document ids by `scores`, descending; ties by ascending id.
///
/// When `eligible` is set only those ids compete.
pub fn top_k_lexical(scores: &[f64], eligible: Option<&[DocId]>, k: usize) -> Vec<DocId> {
    if k == 0 {
        return Vec::new();
    }
    let mut ids: Vec<DocId> = match eligible {
        Some(ids) => ids.iter().copied().filter(|&id| id < scores.len()).collect(),
        None => (0..scores.len()).collect(),
    };

    let cmp = |a: &DocId, b: &DocId| -> Ordering {
        scores[*b].total_cmp(&scores[*a]).then_with(|| a.cmp(b))
    };
    if ids.len() > k {
        ids.select_nth_unstable_by(k - 1, cmp);
        ids.truncate(k);
    }
    ids.sort_unstable_by(cmp);
    ids
}

/// Merge the dense and lexical lists into one ordered, duplicate-free list.
///
/// Dense ids come first in their similarity order, then lexical ids; the first
/// occurrence of an id wins and the result holds at most `k_dense + k_lex` ids.
pub fn fuse_candidates(dense: &[DocId], lexical: &[DocId], k_dense: usize, k_lex: usize) -> Vec<DocId> {
    let limit = k_dense.saturating_add(k_lex);
    let mut seen = FxHashSet::default();
    dense
        .iter()
        .take(k_dense)
        .chain(lexical.iter().take(k_lex))
        .copied()
        .filter(|id| seen.insert(*id))
        .take(limit)
        .collect()
}
