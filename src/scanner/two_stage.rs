use serde::{Deserialize, Serialize};

use crate::scanner::{score_starts, Scored};
use crate::vector::{build_coarse_vector_into, NormalizationMode};

/// How retrieval is chosen per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Two-stage once the candidate count reaches `auto_min_candidates`.
    #[default]
    Auto,
    SingleStage,
    TwoStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoStageParams {
    /// Days of log-return summed into one coarse component.
    pub coarse_stride: usize,
    /// Stage-1 similarity a candidate needs to survive.
    pub similarity_floor: f64,
    /// Upper bound on stage-1 survivors (raised to `top_k` when smaller).
    pub max_survivors: usize,
    /// Candidate count from which `RetrievalMode::Auto` prunes.
    pub auto_min_candidates: usize,
}

impl Default for TwoStageParams {
    fn default() -> Self {
        Self {
            coarse_stride: 5,
            similarity_floor: 0.2,
            max_survivors: 400,
            auto_min_candidates: 5_000,
        }
    }
}

/// Retrieval algorithm resolved for one scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetrievalStrategy {
    SingleStage,
    TwoStage(TwoStageParams),
}

impl RetrievalStrategy {
    pub fn select(mode: RetrievalMode, params: TwoStageParams, candidate_count: usize) -> Self {
        match mode {
            RetrievalMode::SingleStage => Self::SingleStage,
            RetrievalMode::TwoStage => Self::TwoStage(params),
            RetrievalMode::Auto if candidate_count >= params.auto_min_candidates => {
                Self::TwoStage(params)
            }
            RetrievalMode::Auto => Self::SingleStage,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleStage => "single_stage",
            Self::TwoStage(_) => "two_stage",
        }
    }
}

/// Stage 1: rank `starts` on the coarse representation and keep the survivors.
///
/// Survivors are the candidates at or above the similarity floor, best first,
/// capped at `max(max_survivors, top_k)`. When the floor leaves fewer than
/// `top_k`, the best coarse scores fill the gap regardless of the floor.
/// The returned starts are in stage-1 rank order.
pub fn prune(
    closes: &[f64],
    starts: &[usize],
    window_len: usize,
    current: &[f64],
    mode: NormalizationMode,
    params: &TwoStageParams,
    top_k: usize,
) -> Vec<usize> {
    let stride = params.coarse_stride.max(1);
    let mut current_coarse = Vec::with_capacity(window_len / stride + 1);
    build_coarse_vector_into(current, mode, stride, &mut current_coarse);

    let mut coarse: Vec<Scored> = score_starts(starts, window_len, |start, buf| {
        build_coarse_vector_into(&closes[start..start + window_len], mode, stride, buf);
        crate::vector::cosine_similarity(buf, &current_coarse)
    });
    coarse.sort_by(Scored::rank_order);

    let cap = params.max_survivors.max(top_k);
    let above_floor = coarse
        .iter()
        .take_while(|s| s.similarity >= params.similarity_floor)
        .count();
    let keep = above_floor.max(top_k).min(cap).min(coarse.len());
    coarse.truncate(keep);
    coarse.into_iter().map(|s| s.start).collect()
}
