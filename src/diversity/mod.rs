pub mod phase;

use std::collections::HashMap;

use crate::scanner::Match;

pub use phase::{classify_window, MarketPhase, PhaseRules, PhaseSignals};

/// Cap how many matches any one market phase may contribute.
///
/// Walks `matches` in their given order and keeps a match only while its
/// phase has fewer than `max_per_phase` kept entries, stopping once
/// `max_total` are kept. Kept matches retain their order, similarity and rank.
pub fn filter(matches: Vec<Match>, max_per_phase: usize, max_total: usize) -> Vec<Match> {
    let input_len = matches.len();
    let mut per_phase: HashMap<MarketPhase, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(max_total.min(input_len));

    for m in matches {
        if kept.len() >= max_total {
            break;
        }
        let count = per_phase.entry(m.phase).or_insert(0);
        if *count >= max_per_phase {
            continue;
        }
        *count += 1;
        kept.push(m);
    }

    tracing::debug!(
        input = input_len,
        kept = kept.len(),
        max_per_phase,
        max_total,
        "diversity filter applied"
    );
    kept
}

/// Number of matches per phase, for reporting.
pub fn phase_counts(matches: &[Match]) -> Vec<(MarketPhase, usize)> {
    MarketPhase::ALL
        .iter()
        .map(|phase| (*phase, matches.iter().filter(|m| m.phase == *phase).count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}
