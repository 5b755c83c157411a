pub mod two_stage;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::diversity::phase::{classify_window, MarketPhase};
use crate::error::{ForecastError, ForecastResult};
use crate::model::{PriceSeries, Window};
use crate::vector::{build_vector, build_vector_into, cosine_similarity, NormalizationMode};

pub use two_stage::{RetrievalMode, RetrievalStrategy, TwoStageParams};

/// A historical window judged against the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    #[serde(flatten)]
    pub window: Window,
    pub similarity: f64,
    pub phase: MarketPhase,
    /// 1-based position in the scan ranking.
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    pub window_len: usize,
    pub min_gap_days: usize,
    pub top_k: usize,
    pub mode: NormalizationMode,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub matches: Vec<Match>,
    pub strategy: RetrievalStrategy,
    /// Valid historical window starts in the corpus.
    pub candidates: usize,
    /// Candidates scored with the full representation.
    pub rescored: usize,
}

/// Candidate positions for a corpus of `corpus_len` bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLayout {
    pub current_start: usize,
    /// Last start index whose window ends `min_gap_days` before `current_start`.
    pub last_candidate_start: usize,
}

impl ScanLayout {
    pub fn new(corpus_len: usize, window_len: usize, min_gap_days: usize) -> ForecastResult<Self> {
        if window_len < 2 {
            return Err(ForecastError::InvalidParameter(format!(
                "window_len must be >= 2, got {}",
                window_len
            )));
        }
        let required = window_len
            .checked_mul(2)
            .and_then(|v| v.checked_add(min_gap_days))
            .ok_or_else(|| {
                ForecastError::InvalidParameter("window_len + min_gap_days overflows".to_string())
            })?;
        if corpus_len < required {
            return Err(ForecastError::InsufficientData {
                required,
                available: corpus_len,
            });
        }
        let current_start = corpus_len - window_len;
        Ok(Self {
            current_start,
            last_candidate_start: current_start - min_gap_days - (window_len - 1),
        })
    }

    pub fn candidate_count(&self) -> usize {
        self.last_candidate_start + 1
    }

    pub fn is_candidate(&self, start: usize) -> bool {
        start <= self.last_candidate_start
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Scored {
    pub start: usize,
    pub similarity: f64,
}

impl Scored {
    /// Similarity descending, then the later window first.
    pub fn rank_order(a: &Scored, b: &Scored) -> Ordering {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.start.cmp(&a.start))
    }
}

/// Single-stage scan over every valid historical window.
pub fn scan(
    corpus: &PriceSeries,
    window_len: usize,
    min_gap_days: usize,
    top_k: usize,
    mode: NormalizationMode,
) -> ForecastResult<Vec<Match>> {
    let params = ScanParams {
        window_len,
        min_gap_days,
        top_k,
        mode,
    };
    scan_with(corpus, &params, RetrievalStrategy::SingleStage).map(|outcome| outcome.matches)
}

/// Scan with an explicit retrieval strategy.
pub fn scan_with(
    corpus: &PriceSeries,
    params: &ScanParams,
    strategy: RetrievalStrategy,
) -> ForecastResult<ScanOutcome> {
    let layout = ScanLayout::new(corpus.len(), params.window_len, params.min_gap_days)?;
    let closes = corpus.closes();
    let current = &closes[layout.current_start..];
    let all_starts: Vec<usize> = (0..=layout.last_candidate_start).collect();

    let starts = match strategy {
        RetrievalStrategy::SingleStage => all_starts,
        RetrievalStrategy::TwoStage(ref two_stage) => two_stage::prune(
            closes,
            &all_starts,
            params.window_len,
            current,
            params.mode,
            two_stage,
            params.top_k,
        ),
    };
    let rescored = starts.len();
    let matches = rank_starts(corpus, params, &layout, &starts);

    tracing::debug!(
        asset = %corpus.asset(),
        strategy = strategy.label(),
        candidates = layout.candidate_count(),
        rescored,
        returned = matches.len(),
        "similarity scan finished"
    );

    Ok(ScanOutcome {
        matches,
        strategy,
        candidates: layout.candidate_count(),
        rescored,
    })
}

/// Full-representation ranking restricted to `starts`.
///
/// Starts that are not valid candidates for this corpus are ignored.
pub fn rank_subset(
    corpus: &PriceSeries,
    params: &ScanParams,
    starts: &[usize],
) -> ForecastResult<Vec<Match>> {
    let layout = ScanLayout::new(corpus.len(), params.window_len, params.min_gap_days)?;
    Ok(rank_starts(corpus, params, &layout, starts))
}

fn rank_starts(
    corpus: &PriceSeries,
    params: &ScanParams,
    layout: &ScanLayout,
    starts: &[usize],
) -> Vec<Match> {
    if params.top_k == 0 {
        return Vec::new();
    }
    let closes = corpus.closes();
    let window_len = params.window_len;
    let mode = params.mode;
    let current = build_vector(&closes[layout.current_start..], mode);

    let valid: Vec<usize> = starts
        .iter()
        .copied()
        .filter(|s| layout.is_candidate(*s))
        .collect();
    let mut scored = score_starts(&valid, window_len, |start, buf| {
        build_vector_into(&closes[start..start + window_len], mode, buf);
        cosine_similarity(buf, &current)
    });
    scored.sort_by(Scored::rank_order);
    scored.dedup_by_key(|s| s.start);
    scored.truncate(params.top_k);

    scored
        .into_iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let window = corpus.window(s.start, window_len)?;
            Some(Match {
                phase: classify_window(corpus.window_closes(&window)),
                window,
                similarity: s.similarity,
                rank: i + 1,
            })
        })
        .collect()
}

#[cfg(feature = "parallel")]
pub(crate) fn score_starts<F>(starts: &[usize], window_len: usize, score: F) -> Vec<Scored>
where
    F: Fn(usize, &mut Vec<f64>) -> f64 + Sync + Send,
{
    use rayon::prelude::*;

    starts
        .par_iter()
        .map_init(
            || Vec::with_capacity(window_len),
            |buf, &start| Scored {
                start,
                similarity: score(start, buf),
            },
        )
        .collect()
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn score_starts<F>(starts: &[usize], window_len: usize, score: F) -> Vec<Scored>
where
    F: Fn(usize, &mut Vec<f64>) -> f64 + Sync + Send,
{
    let mut buf = Vec::with_capacity(window_len);
    starts
        .iter()
        .map(|&start| Scored {
            start,
            similarity: score(start, &mut buf),
        })
        .collect()
}
