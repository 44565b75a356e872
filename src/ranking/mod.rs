use crate::models::{PollEntry, RankedEntry};
use std::collections::HashMap;

// Rank entries by vote count (descending) and diff against the previous ranks.
// `sort_by` is stable, so entries with equal votes keep their page order.
pub fn merge(current: &[PollEntry], previous: &HashMap<String, u32>) -> Vec<RankedEntry> {
    let mut sorted: Vec<&PollEntry> = current.iter().collect();
    sorted.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));

    sorted
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            let current_rank = position as u32 + 1;
            let previous_rank = previous.get(&entry.name).copied();

            RankedEntry {
                name: entry.name.clone(),
                vote_count: entry.vote_count,
                previous_rank,
                current_rank,
                rank_delta: previous_rank.map(|prev| i64::from(prev) - i64::from(current_rank)),
            }
        })
        .collect()
}
