//! Path reconstruction from a run's step record.
//!
//! A run's path is the de-duplicated sequence of consecutive distinct
//! article titles across its steps, always prefixed by the session's start
//! article. Resuming a run at any step prefix must yield the same path and
//! hop count that driving it live would have.

use super::model::Step;
use crate::title::titles_equal;

/// Reconstructs the path taken so far, start article first.
pub fn reconstruct_path(start_article: &str, steps: &[Step]) -> Vec<String> {
    let mut path: Vec<String> = vec![start_article.to_string()];
    for step in steps {
        if let Some(last) = path.last() {
            if titles_equal(last, &step.article) {
                continue;
            }
        }
        path.push(step.article.clone());
    }
    path
}

/// Number of hops represented by a reconstructed path.
pub fn hops_taken(path: &[String]) -> u32 {
    path.len().saturating_sub(1) as u32
}
