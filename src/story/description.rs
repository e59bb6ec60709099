//! Scene descriptions.

use crate::models::SearchResult;

/// Renders the markdown description of one alignment.
///
/// Scores use fixed precision: RMSD with 2 decimals, TM-scores with 4, and
/// percentages with 1.
#[must_use]
pub fn alignment_description(query_id: &str, result: &SearchResult) -> String {
    format!(
        "### {query} aligned to {target}\n\
         \n\
         - RMSD: {rmsd:.2} Å\n\
         - TM-score: {tm:.4}\n\
         - Target TM-score: {tm_target:.4}\n\
         - Aligned: {aligned:.1}%\n\
         - Sequence identity: {identity:.1}%\n",
        query = query_id.trim().to_uppercase(),
        target = result.object_id.to_uppercase(),
        rmsd = result.rmsd,
        tm = result.tm_score,
        tm_target = result.tm_score_target,
        aligned = result.aligned_percentage * 100.0,
        identity = result.sequence_aligned_percentage * 100.0,
    )
}
