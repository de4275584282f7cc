// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Schedule due-checks and scheduled sync runs.
//!
//! The check is driven by an external cadence (or the optional internal
//! ticker) and may be invoked more often than expected. A schedule fires at
//! most once per matching window: its run is recorded on the schedule
//! whether it succeeded or not, and a recorded run inside the window
//! suppresses further firing.

use crate::db::ScheduleStore;
use crate::error::AppError;
use crate::models::{InventoryRecord, RunStatus, Schedule};
use crate::services::inventory::AccountSync;
use crate::services::jobs::LogProgress;
use crate::services::mailer::ReportMailer;
use chrono::{DateTime, Datelike, Days, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest local-time gap searched when a wall-clock time is skipped.
const MAX_GAP_MINUTES: i64 = 180;

/// Resolve a local wall-clock time in `tz`.
///
/// Ambiguous times take the earlier instant. Times skipped by a
/// spring-forward transition resolve to the first instant after the gap.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    (0..=MAX_GAP_MINUTES).find_map(|minutes| {
        tz.from_local_datetime(&(local + chrono::Duration::minutes(minutes)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Start of the window `schedule` is currently in, if any.
///
/// Today's and yesterday's occurrences are both considered so a window that
/// opens before midnight still matches after it.
fn current_window_start(
    schedule: &Schedule,
    now: DateTime<Utc>,
    tolerance: chrono::Duration,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    let local_today = now.with_timezone(&tz).date_naive();

    [0u64, 1].into_iter().find_map(|days_back| {
        let date = local_today.checked_sub_days(Days::new(days_back))?;
        if !schedule.days_of_week.contains(&date.weekday()) {
            return None;
        }
        let scheduled = resolve_local(tz, date.and_time(schedule.time_of_day))?;
        let elapsed = now - scheduled;
        (elapsed >= chrono::Duration::zero() && elapsed < tolerance).then_some(scheduled)
    })
}

/// Whether `schedule` should fire at `now`.
pub fn is_due(schedule: &Schedule, now: DateTime<Utc>, tolerance: Duration, tz: Tz) -> bool {
    if !schedule.enabled {
        return false;
    }
    let tolerance = chrono::Duration::from_std(tolerance).unwrap_or(chrono::Duration::zero());

    match current_window_start(schedule, now, tolerance, tz) {
        Some(window_start) => !schedule
            .last_run_at
            .is_some_and(|last| last >= window_start),
        None => false,
    }
}

/// Schedules that should fire at `now`.
pub fn due_schedules<'a>(
    now: DateTime<Utc>,
    schedules: &'a [Schedule],
    tolerance: Duration,
    tz: Tz,
) -> Vec<&'a Schedule> {
    schedules
        .iter()
        .filter(|s| is_due(s, now, tolerance, tz))
        .collect()
}

/// Outcome of one scheduled run.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRun {
    pub schedule_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one due-check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub checked: usize,
    pub runs: Vec<ScheduleRun>,
    /// Due schedules skipped because a run is already in progress here
    pub skipped: Vec<String>,
}

/// Runs due schedules: sync, filter, report, record.
#[derive(Clone)]
pub struct ScheduleRunner {
    schedules: Arc<dyn ScheduleStore>,
    sync: Arc<dyn AccountSync>,
    mailer: Arc<dyn ReportMailer>,
    tolerance: Duration,
    tz: Tz,
    in_flight: Arc<DashMap<String, ()>>,
}

impl ScheduleRunner {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        sync: Arc<dyn AccountSync>,
        mailer: Arc<dyn ReportMailer>,
        tolerance: Duration,
        tz: Tz,
    ) -> Self {
        Self {
            schedules,
            sync,
            mailer,
            tolerance,
            tz,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Run every schedule due at `now`.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<CheckReport, AppError> {
        let schedules = self.schedules.list_schedules().await?;
        let due: Vec<Schedule> = due_schedules(now, &schedules, self.tolerance, self.tz)
            .into_iter()
            .cloned()
            .collect();

        let mut report = CheckReport {
            checked: schedules.len(),
            ..CheckReport::default()
        };

        tracing::info!(checked = report.checked, due = due.len(), "Schedule check");

        for schedule in due {
            if self.in_flight.insert(schedule.id.clone(), ()).is_some() {
                tracing::info!(schedule_id = %schedule.id, "Schedule already running, skipping");
                report.skipped.push(schedule.id);
                continue;
            }

            let outcome = self.run_one(&schedule).await;
            self.in_flight.remove(&schedule.id);

            let run = match outcome {
                Ok(rows) => ScheduleRun {
                    schedule_id: schedule.id.clone(),
                    status: RunStatus::Success,
                    rows: Some(rows),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(schedule_id = %schedule.id, error = %e, "Scheduled run failed");
                    ScheduleRun {
                        schedule_id: schedule.id.clone(),
                        status: RunStatus::Failed,
                        rows: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            if let Err(e) = self.schedules.record_run(&schedule.id, now, run.status).await {
                tracing::error!(schedule_id = %schedule.id, error = %e, "Failed to record schedule run");
            }
            report.runs.push(run);
        }

        Ok(report)
    }

    async fn run_one(&self, schedule: &Schedule) -> Result<usize, AppError> {
        tracing::info!(
            schedule_id = %schedule.id,
            account_id = %schedule.account_id,
            mode = ?schedule.mode,
            "Running scheduled sync"
        );

        self.sync
            .sync_account(
                &schedule.account_id,
                schedule.mode,
                Some(&schedule.email),
                &LogProgress,
            )
            .await?;

        let rows: Vec<InventoryRecord> = self
            .sync
            .cached_rows(&schedule.account_id)
            .await?
            .into_iter()
            .filter(|r| schedule.filters.matches(r))
            .collect();

        self.mailer.send_report(schedule, &rows).await?;
        Ok(rows.len())
    }

    /// Run due-checks on a fixed interval until `shutdown` is cancelled.
    pub fn spawn_ticker(
        self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_due(Utc::now()).await {
                            tracing::error!(error = %e, "Scheduled check failed");
                        }
                    }
                }
            }
            tracing::info!("Schedule ticker stopped");
        })
    }
}
