use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{ForecastError, ForecastResult};
use crate::guard::store::{GuardKey, GuardStateStore};
use crate::guard::{
    step, GuardInputs, GuardState, LevelThresholds, TransitionInfo, TransitionKind,
};

#[derive(Debug, Clone, Serialize)]
pub struct GuardDecision {
    pub key: GuardKey,
    pub state: GuardState,
    pub transition: TransitionInfo,
}

/// Evaluates guard steps against a store, one writer per key at a time.
///
/// Calls for the same [`GuardKey`] are serialized so the load-step-save cycle
/// never interleaves; different keys only contend on the lock map itself.
pub struct GuardService<S: GuardStateStore> {
    store: S,
    thresholds: LevelThresholds,
    locks: Mutex<HashMap<GuardKey, Arc<Mutex<()>>>>,
}

impl<S: GuardStateStore> GuardService<S> {
    pub fn new(store: S, thresholds: LevelThresholds) -> ForecastResult<Self> {
        thresholds.validate()?;
        Ok(Self {
            store,
            thresholds,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn thresholds(&self) -> &LevelThresholds {
        &self.thresholds
    }

    pub fn evaluate(
        &self,
        key: &GuardKey,
        inputs: &GuardInputs,
    ) -> ForecastResult<GuardDecision> {
        let key_lock = self.key_lock(key)?;
        let _held = key_lock
            .lock()
            .map_err(|_| ForecastError::Store(format!("guard lock for {} poisoned", key)))?;

        let prev = self
            .store
            .load(key)?
            .unwrap_or_else(|| GuardState::fresh(inputs.as_of));
        let (next, info) = step(inputs, &prev, &self.thresholds);
        self.store.save(key, &next)?;

        match info.kind {
            TransitionKind::Promoted | TransitionKind::Demoted => tracing::info!(
                key = %key,
                as_of = %inputs.as_of,
                prev = %info.prev_level,
                new = %info.new_level,
                raw = %info.raw_level,
                cooldown_active = info.cooldown_active,
                "guard level changed"
            ),
            TransitionKind::Held | TransitionKind::Unchanged => tracing::debug!(
                key = %key,
                as_of = %inputs.as_of,
                level = %info.new_level,
                raw = %info.raw_level,
                min_hold_active = info.min_hold_active,
                cooldown_active = info.cooldown_active,
                days_in_state = info.days_in_state,
                "guard level held"
            ),
        }

        Ok(GuardDecision {
            key: key.clone(),
            state: next,
            transition: info,
        })
    }

    fn key_lock(&self, key: &GuardKey) -> ForecastResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ForecastError::Store("guard lock map poisoned".to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }
}
