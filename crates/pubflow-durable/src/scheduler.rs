//! Cron scheduler.
//!
//! Once a minute the scheduler evaluates a data-driven time-of-day table
//! into conditional starts, gates each on "last completed at least N
//! seconds ago", and hands the survivors to their starters. Rows can match
//! on the UTC hour or on the hour in the configured local timezone.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::backend::WorkflowBackend;
use crate::flag::RunFlag;
use crate::starter::StarterRegistry;

/// One row of the schedule table.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRow {
    pub minute_from: u32,
    pub minute_to: u32,
    /// Match only this UTC hour, when set.
    #[serde(default)]
    pub hour_utc: Option<u32>,
    /// Match only this local-time hour, when set.
    #[serde(default)]
    pub hour_local: Option<u32>,
    pub starter: String,
    pub workflow_id: String,
    pub min_interval_seconds: u64,
}

/// A workflow that should be started now, if its gate allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalStart {
    pub starter: String,
    pub workflow_id: String,
    pub min_interval: Duration,
}

/// Error loading a schedule.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule table did not parse: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown timezone name: {0}")]
    Timezone(String),
}

/// The loaded time-of-day table.
#[derive(Debug, Clone)]
pub struct Schedule {
    rows: Vec<ScheduleRow>,
}

impl Schedule {
    pub fn from_yaml(source: &str) -> Result<Self, ScheduleError> {
        Ok(Self {
            rows: serde_yaml::from_str(source)?,
        })
    }

    pub fn rows(&self) -> &[ScheduleRow] {
        &self.rows
    }

    /// The conditional starts due at `utc_now`.
    pub fn conditional_starts(&self, utc_now: DateTime<Utc>, tz: Tz) -> Vec<ConditionalStart> {
        let minute = utc_now.minute();
        let utc_hour = utc_now.hour();
        let local_hour = utc_now.with_timezone(&tz).hour();

        self.rows
            .iter()
            .filter(|row| {
                minute >= row.minute_from
                    && minute <= row.minute_to
                    && row.hour_utc.map_or(true, |hour| hour == utc_hour)
                    && row.hour_local.map_or(true, |hour| hour == local_hour)
            })
            .map(|row| ConditionalStart {
                starter: row.starter.clone(),
                workflow_id: row.workflow_id.clone(),
                min_interval: Duration::from_secs(row.min_interval_seconds),
            })
            .collect()
    }
}

/// Gate: start iff there is no prior completion or the last one is at
/// least `min_interval` old.
pub fn should_start(
    now: DateTime<Utc>,
    last_completed: Option<DateTime<Utc>>,
    min_interval: Duration,
) -> bool {
    match last_completed {
        None => true,
        Some(last) => {
            let elapsed = now.signed_duration_since(last);
            elapsed.num_seconds() >= min_interval.as_secs() as i64
        }
    }
}

/// The cron process.
pub struct CronScheduler {
    backend: Arc<dyn WorkflowBackend>,
    starters: Arc<StarterRegistry>,
    schedule: Schedule,
    timezone: Tz,
}

impl CronScheduler {
    pub fn new(
        backend: Arc<dyn WorkflowBackend>,
        starters: Arc<StarterRegistry>,
        schedule: Schedule,
        timezone_name: &str,
    ) -> Result<Self, ScheduleError> {
        let timezone = Tz::from_str(timezone_name)
            .map_err(|_| ScheduleError::Timezone(timezone_name.to_string()))?;
        Ok(Self {
            backend,
            starters,
            schedule,
            timezone,
        })
    }

    /// Evaluate the table once for the given instant.
    pub async fn tick(&self, now: DateTime<Utc>) {
        for start in self.schedule.conditional_starts(now, self.timezone) {
            let last_completed = match self.backend.last_completed_at(&start.workflow_id).await {
                Ok(last) => last,
                Err(err) => {
                    error!(workflow_id = %start.workflow_id, "completion lookup failed: {err}");
                    continue;
                }
            };

            if !should_start(now, last_completed, start.min_interval) {
                let short = start.min_interval.as_secs() as i64
                    - now
                        .signed_duration_since(last_completed.unwrap_or(now))
                        .num_seconds();
                info!(
                    workflow_id = %start.workflow_id,
                    "ran previously, {short} seconds short to start again"
                );
                continue;
            }

            let Some(starter) = self.starters.get(&start.starter) else {
                // The table is data and may name starters this build does
                // not carry.
                warn!(starter = %start.starter, "no starter registered, skipping row");
                continue;
            };

            info!(starter = %start.starter, workflow_id = %start.workflow_id, "cron start");
            if let Err(err) = starter
                .start(&self.backend, json!({ "workflow_id": start.workflow_id }))
                .await
            {
                error!(workflow_id = %start.workflow_id, "cron start failed: {err}");
            }
        }
    }

    /// Tick once a minute until the flag is lowered.
    pub async fn run(&self, flag: RunFlag) {
        info!("cron scheduler running");
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        let mut shutdown = flag.subscribe();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !flag.green() {
                        break;
                    }
                    self.tick(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        info!("graceful shutdown");
    }
}
