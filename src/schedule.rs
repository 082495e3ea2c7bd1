use crate::{
    error::{UpdError, UpdResult},
    utils::get_default_from_env,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DELAY_HOURS: u64 = 2;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleSettings {
    #[serde(default = "_default_schedule_file")]
    pub file: String,
    #[serde(default = "_default_schedule_delay_hours")]
    pub delay_hours: u64,
}

fn _default_schedule_file() -> String {
    get_default_from_env("UPDATR_SCHEDULE_FILE", "schedule.json".into())
}
fn _default_schedule_delay_hours() -> u64 {
    get_default_from_env("UPDATR_SCHEDULE_DELAY_HOURS", DEFAULT_DELAY_HOURS)
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            file: _default_schedule_file(),
            delay_hours: _default_schedule_delay_hours(),
        }
    }
}

impl ScheduleSettings {
    pub fn min_delay(&self) -> Duration {
        hours(self.delay_hours)
    }
}

pub fn hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

/// Persisted time of the last remote check, in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScheduleRecord {
    pub time: i64,
}

/// Whether enough time has passed since `stored` to hit the remote again.
///
/// A stored time in the future (clock went backwards) throttles until the
/// clock catches up.
pub fn should_check(now: i64, stored: Option<i64>, min_delay: Duration) -> bool {
    match stored {
        None => true,
        Some(stored) => i128::from(now) - i128::from(stored) >= i128::from(min_delay.as_secs()),
    }
}

/// Time left until [`should_check`] turns true.
pub fn remaining(now: i64, stored: Option<i64>, min_delay: Duration) -> Duration {
    let Some(stored) = stored else {
        return Duration::ZERO;
    };
    let due = i128::from(stored) + i128::from(min_delay.as_secs());
    let left = (due - i128::from(now)).max(0);
    Duration::from_secs(u64::try_from(left).unwrap_or(u64::MAX))
}

/// Persistence port for the schedule record.
pub trait ScheduleStore {
    fn load(&self) -> Option<ScheduleRecord>;
    fn save(&self, record: &ScheduleRecord) -> UpdResult<()>;
}

pub struct FileScheduleStore {
    path: PathBuf,
}

impl FileScheduleStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScheduleStore for FileScheduleStore {
    fn load(&self) -> Option<ScheduleRecord> {
        if !self.path.is_file() {
            return None;
        }
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                log::warn!("Failed to read schedule file {}: {}", self.path.display(), err);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(err) => {
                log::warn!("Ignoring invalid schedule file {}: {}", self.path.display(), err);
                None
            }
        }
    }

    fn save(&self, record: &ScheduleRecord) -> UpdResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(UpdError::FileSystemError(
                "Schedule file path is empty".to_string(),
            ));
        }
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, content).map_err(|err| {
            UpdError::FileSystemError(format!(
                "Failed to write schedule file {}: {}",
                self.path.display(),
                err
            ))
        })
    }
}

/// Throttles remote checks to one per `min_delay`.
pub struct ScheduleGate<S> {
    store: S,
    min_delay: Duration,
}

impl<S: ScheduleStore> ScheduleGate<S> {
    pub fn new(store: S, min_delay: Duration) -> Self {
        Self { store, min_delay }
    }

    pub fn should_check(&self, now: i64) -> bool {
        should_check(now, self.last_check(), self.min_delay)
    }

    pub fn remaining(&self, now: i64) -> Duration {
        remaining(now, self.last_check(), self.min_delay)
    }

    pub fn last_check(&self) -> Option<i64> {
        self.store.load().map(|record| record.time)
    }

    /// Stores `now` as the last check. Returns whether it was persisted; a
    /// failure only means the next run may check early.
    pub fn record_check(&self, now: i64) -> bool {
        match self.store.save(&ScheduleRecord { time: now }) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Could not record update check time: {}", err);
                false
            }
        }
    }
}
