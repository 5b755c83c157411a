pub mod service;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

pub use service::{GuardDecision, GuardService};
pub use store::{GuardKey, GuardStateStore, InMemoryGuardStore, SqliteGuardStore};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardLevel {
    #[default]
    None,
    Warn,
    Crisis,
    Block,
}

impl GuardLevel {
    pub const ALL: [GuardLevel; 4] = [
        GuardLevel::None,
        GuardLevel::Warn,
        GuardLevel::Crisis,
        GuardLevel::Block,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Warn => "WARN",
            Self::Crisis => "CRISIS",
            Self::Block => "BLOCK",
        }
    }
}

impl fmt::Display for GuardLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuardLevel {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "WARN" => Ok(Self::Warn),
            "CRISIS" => Ok(Self::Crisis),
            "BLOCK" => Ok(Self::Block),
            other => Err(ForecastError::InvalidParameter(format!(
                "unknown guard level '{}'",
                other
            ))),
        }
    }
}

/// Scalar risk snapshot; the only data the guard sees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardInputs {
    pub credit_composite: f64,
    pub vix: f64,
    /// Positive values mean macro stress.
    pub macro_score_signed: f64,
    pub as_of: NaiveDate,
}

/// Persisted guard state for one (asset, environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardState {
    pub level: GuardLevel,
    pub raw_level: GuardLevel,
    pub state_since: NaiveDate,
    pub cooldown_until: Option<NaiveDate>,
}

impl GuardState {
    /// State used on the first evaluation of a key.
    pub fn fresh(as_of: NaiveDate) -> Self {
        Self {
            level: GuardLevel::None,
            raw_level: GuardLevel::None,
            state_since: as_of,
            cooldown_until: None,
        }
    }

    pub fn days_in_state(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.state_since).num_days().max(0)
    }

    pub fn cooldown_active(&self, as_of: NaiveDate) -> bool {
        self.cooldown_until.is_some_and(|until| as_of < until)
    }
}

/// Enter/exit bounds and minimum dwell for one level.
///
/// `macro_enter`/`macro_exit` are optional; when absent the macro score does
/// not take part in the level's condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelBand {
    pub credit_enter: f64,
    pub credit_exit: f64,
    pub vix_enter: f64,
    pub vix_exit: f64,
    #[serde(default)]
    pub macro_enter: Option<f64>,
    #[serde(default)]
    pub macro_exit: Option<f64>,
    pub min_hold_days: u32,
}

impl LevelBand {
    fn validate(&self, level: GuardLevel) -> ForecastResult<()> {
        let pairs = [
            ("credit", Some(self.credit_enter), Some(self.credit_exit)),
            ("vix", Some(self.vix_enter), Some(self.vix_exit)),
            ("macro", self.macro_enter, self.macro_exit),
        ];
        for (name, enter, exit) in pairs {
            match (enter, exit) {
                (Some(enter), Some(exit)) => {
                    if !enter.is_finite() || !exit.is_finite() {
                        return Err(ForecastError::InvalidParameter(format!(
                            "{} {} thresholds must be finite",
                            level, name
                        )));
                    }
                    if exit >= enter {
                        return Err(ForecastError::InvalidParameter(format!(
                            "{} {} exit ({}) must be below enter ({})",
                            level, name, exit, enter
                        )));
                    }
                }
                (None, None) => {}
                _ => {
                    return Err(ForecastError::InvalidParameter(format!(
                        "{} {} needs both enter and exit thresholds",
                        level, name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Enter and exit bounds for the four-level hysteresis guard.
///
/// Entry into a more severe level is immediate; leaving a level needs both a
/// minimum dwell time and the level's more lenient exit condition. After
/// `BLOCK` is left, re-entry into `BLOCK` is capped at `CRISIS` until the
/// cooldown ends.
///
/// Enter bounds are closed (`value >= enter`) and exit bounds are open
/// (`value < exit`), with `exit < enter` enforced by [`LevelThresholds::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelThresholds {
    pub warn: LevelBand,
    pub crisis: LevelBand,
    pub block: LevelBand,
    pub cooldown_days: u32,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            warn: LevelBand {
                credit_enter: 0.25,
                credit_exit: 0.20,
                vix_enter: 20.0,
                vix_exit: 17.0,
                macro_enter: Some(0.30),
                macro_exit: Some(0.20),
                min_hold_days: 3,
            },
            crisis: LevelBand {
                credit_enter: 0.40,
                credit_exit: 0.33,
                vix_enter: 28.0,
                vix_exit: 24.0,
                macro_enter: None,
                macro_exit: None,
                min_hold_days: 5,
            },
            block: LevelBand {
                credit_enter: 0.50,
                credit_exit: 0.45,
                vix_enter: 30.0,
                vix_exit: 26.0,
                macro_enter: None,
                macro_exit: None,
                min_hold_days: 7,
            },
            cooldown_days: 14,
        }
    }
}

impl LevelThresholds {
    pub fn validate(&self) -> ForecastResult<()> {
        self.warn.validate(GuardLevel::Warn)?;
        self.crisis.validate(GuardLevel::Crisis)?;
        self.block.validate(GuardLevel::Block)?;
        Ok(())
    }

    fn band(&self, level: GuardLevel) -> Option<&LevelBand> {
        match level {
            GuardLevel::None => None,
            GuardLevel::Warn => Some(&self.warn),
            GuardLevel::Crisis => Some(&self.crisis),
            GuardLevel::Block => Some(&self.block),
        }
    }

    pub fn min_hold_days(&self, level: GuardLevel) -> i64 {
        self.band(level).map_or(0, |b| i64::from(b.min_hold_days))
    }

    /// Enter condition: `BLOCK` needs every signal, lower levels any one.
    pub fn enter_hit(&self, level: GuardLevel, inputs: &GuardInputs) -> bool {
        let Some(band) = self.band(level) else {
            return true;
        };
        let credit = inputs.credit_composite >= band.credit_enter;
        let vix = inputs.vix >= band.vix_enter;
        let macro_hit = band.macro_enter.map(|m| inputs.macro_score_signed >= m);
        if level == GuardLevel::Block {
            credit && vix && macro_hit.unwrap_or(true)
        } else {
            credit || vix || macro_hit.unwrap_or(false)
        }
    }

    /// Exit condition: the enter condition negated, checked against exit bounds.
    pub fn exit_hit(&self, level: GuardLevel, inputs: &GuardInputs) -> bool {
        let Some(band) = self.band(level) else {
            return true;
        };
        let credit = inputs.credit_composite < band.credit_exit;
        let vix = inputs.vix < band.vix_exit;
        let macro_ok = band.macro_exit.map(|m| inputs.macro_score_signed < m);
        if level == GuardLevel::Block {
            credit || vix || macro_ok.unwrap_or(false)
        } else {
            credit && vix && macro_ok.unwrap_or(true)
        }
    }

    /// Most severe level whose enter condition holds.
    pub fn raw_level(&self, inputs: &GuardInputs) -> GuardLevel {
        [GuardLevel::Block, GuardLevel::Crisis, GuardLevel::Warn]
            .into_iter()
            .find(|level| self.enter_hit(*level, inputs))
            .unwrap_or(GuardLevel::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Promoted,
    Demoted,
    /// A different raw level was seen but the current level was kept.
    Held,
    Unchanged,
}

/// Audit record of one [`step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub as_of: NaiveDate,
    pub prev_level: GuardLevel,
    pub raw_level: GuardLevel,
    pub new_level: GuardLevel,
    pub kind: TransitionKind,
    pub enter_threshold_hit: bool,
    pub exit_threshold_hit: bool,
    pub min_hold_active: bool,
    pub cooldown_active: bool,
    /// Days spent in `new_level` as of this evaluation.
    pub days_in_state: i64,
}

/// Advance the guard by one observation.
///
/// Time comes only from `inputs.as_of`, so replaying a history gives the
/// same sequence of states.
pub fn step(
    inputs: &GuardInputs,
    prev: &GuardState,
    thresholds: &LevelThresholds,
) -> (GuardState, TransitionInfo) {
    let as_of = inputs.as_of;
    let current = prev.level;
    let raw = thresholds.raw_level(inputs);
    let days = prev.days_in_state(as_of);

    let mut next = GuardState {
        raw_level: raw,
        ..*prev
    };
    let mut info = TransitionInfo {
        as_of,
        prev_level: current,
        raw_level: raw,
        new_level: current,
        kind: TransitionKind::Unchanged,
        enter_threshold_hit: false,
        exit_threshold_hit: false,
        min_hold_active: false,
        cooldown_active: false,
        days_in_state: days,
    };

    if raw > current {
        info.enter_threshold_hit = true;
        let mut target = raw;
        if target == GuardLevel::Block && prev.cooldown_active(as_of) {
            target = GuardLevel::Crisis;
            info.cooldown_active = true;
        }
        if target > current {
            next.level = target;
            next.state_since = as_of;
            info.kind = TransitionKind::Promoted;
        } else {
            info.kind = TransitionKind::Held;
        }
    } else if raw < current {
        if days < thresholds.min_hold_days(current) {
            info.min_hold_active = true;
            info.kind = TransitionKind::Held;
        } else if thresholds.exit_hit(current, inputs) {
            info.exit_threshold_hit = true;
            next.level = raw;
            next.state_since = as_of;
            if current == GuardLevel::Block {
                next.cooldown_until =
                    Some(as_of + Duration::days(i64::from(thresholds.cooldown_days)));
            }
            info.kind = TransitionKind::Demoted;
        } else {
            info.kind = TransitionKind::Held;
        }
    }

    info.new_level = next.level;
    info.days_in_state = next.days_in_state(as_of);
    (next, info)
}

/// Step through `history` in order, starting from `initial` or a fresh state.
pub fn replay(
    history: &[GuardInputs],
    thresholds: &LevelThresholds,
    initial: Option<GuardState>,
) -> Vec<(GuardState, TransitionInfo)> {
    let Some(first) = history.first() else {
        return Vec::new();
    };
    let mut state = initial.unwrap_or_else(|| GuardState::fresh(first.as_of));
    history
        .iter()
        .map(|inputs| {
            let (next, info) = step(inputs, &state, thresholds);
            state = next;
            (next, info)
        })
        .collect()
}
