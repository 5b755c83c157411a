use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};
use crate::guard::{GuardLevel, GuardState};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Identity of one logical guard: an asset in a deployment environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuardKey {
    pub asset: String,
    pub environment: String,
}

impl GuardKey {
    pub fn new(asset: &str, environment: &str) -> Self {
        Self {
            asset: asset.trim().to_ascii_uppercase(),
            environment: environment.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.asset, self.environment)
    }
}

/// Keyed persistence for [`GuardState`]; the guard itself never owns storage.
pub trait GuardStateStore: Send + Sync {
    fn load(&self, key: &GuardKey) -> ForecastResult<Option<GuardState>>;
    fn save(&self, key: &GuardKey, state: &GuardState) -> ForecastResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryGuardStore {
    states: Mutex<HashMap<GuardKey, GuardState>>,
}

impl InMemoryGuardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ForecastResult<HashMap<GuardKey, GuardState>> {
        let guard = self
            .states
            .lock()
            .map_err(|_| ForecastError::Store("guard state lock poisoned".to_string()))?;
        Ok(guard.clone())
    }
}

impl GuardStateStore for InMemoryGuardStore {
    fn load(&self, key: &GuardKey) -> ForecastResult<Option<GuardState>> {
        let guard = self
            .states
            .lock()
            .map_err(|_| ForecastError::Store("guard state lock poisoned".to_string()))?;
        Ok(guard.get(key).copied())
    }

    fn save(&self, key: &GuardKey, state: &GuardState) -> ForecastResult<()> {
        let mut guard = self
            .states
            .lock()
            .map_err(|_| ForecastError::Store("guard state lock poisoned".to_string()))?;
        guard.insert(key.clone(), *state);
        Ok(())
    }
}

/// SQLite-backed store, one row per (asset, environment).
#[derive(Debug)]
pub struct SqliteGuardStore {
    conn: Mutex<Connection>,
}

impl SqliteGuardStore {
    pub fn open(path: &Path) -> ForecastResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ForecastError::Store(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> ForecastResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> ForecastResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS guard_state (
                asset TEXT NOT NULL,
                environment TEXT NOT NULL,
                level TEXT NOT NULL,
                raw_level TEXT NOT NULL,
                state_since TEXT NOT NULL,
                cooldown_until TEXT,
                updated_at_ms INTEGER NOT NULL,
                PRIMARY KEY(asset, environment)
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> ForecastResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ForecastError::Store("sqlite connection lock poisoned".to_string()))
    }
}

impl GuardStateStore for SqliteGuardStore {
    fn load(&self, key: &GuardKey) -> ForecastResult<Option<GuardState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT level, raw_level, state_since, cooldown_until
                FROM guard_state
                WHERE asset = ?1 AND environment = ?2
                "#,
                params![key.asset, key.environment],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((level, raw_level, state_since, cooldown_until)) = row else {
            return Ok(None);
        };
        Ok(Some(GuardState {
            level: level.parse::<GuardLevel>()?,
            raw_level: raw_level.parse::<GuardLevel>()?,
            state_since: parse_date(&state_since)?,
            cooldown_until: cooldown_until.as_deref().map(parse_date).transpose()?,
        }))
    }

    fn save(&self, key: &GuardKey, state: &GuardState) -> ForecastResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO guard_state (
                asset, environment, level, raw_level, state_since, cooldown_until, updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(asset, environment) DO UPDATE SET
                level = excluded.level,
                raw_level = excluded.raw_level,
                state_since = excluded.state_since,
                cooldown_until = excluded.cooldown_until,
                updated_at_ms = excluded.updated_at_ms
            "#,
            params![
                key.asset,
                key.environment,
                state.level.as_str(),
                state.raw_level.as_str(),
                state.state_since.format(DATE_FORMAT).to_string(),
                state
                    .cooldown_until
                    .map(|d| d.format(DATE_FORMAT).to_string()),
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

fn parse_date(raw: &str) -> ForecastResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| ForecastError::Store(format!("bad stored date '{}': {}", raw, e)))
}
