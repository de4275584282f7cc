// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Declarative sync-and-report schedules.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::InventoryRecord;

/// How a scheduled run obtains fresh inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Cursor-paginated GraphQL fetch.
    #[default]
    Live,
    /// Remote-generated snapshot (submit, poll, download).
    Snapshot,
}

/// Outcome recorded on a schedule after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Row filters applied to the cache before a report is sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFilters {
    pub warehouse: Option<String>,
    pub location_prefix: Option<String>,
    pub sku_contains: Option<String>,
    pub pickable: Option<bool>,
    pub sellable: Option<bool>,
    pub min_quantity: Option<i64>,
}

impl ScheduleFilters {
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        self.warehouse
            .as_deref()
            .is_none_or(|w| record.warehouse_identifier == w)
            && self
                .location_prefix
                .as_deref()
                .is_none_or(|p| record.location_name.starts_with(p))
            && self
                .sku_contains
                .as_deref()
                .is_none_or(|s| record.sku.contains(s))
            && self.pickable.is_none_or(|p| record.pickable == p)
            && self.sellable.is_none_or(|s| record.sellable == s)
            && self.min_quantity.is_none_or(|q| record.quantity >= q)
    }
}

/// A time-and-day rule for an automatic sync followed by an emailed report.
///
/// Created and edited by operators; the scheduler only reads schedules and
/// annotates `last_run_at`/`last_run_status`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Schedule {
    #[validate(length(min = 1))]
    pub id: String,
    pub name: String,
    #[validate(length(min = 1))]
    pub account_id: String,
    #[validate(email)]
    pub email: String,
    /// Days the schedule fires on, in the scheduler's timezone
    #[validate(length(min = 1))]
    pub days_of_week: Vec<Weekday>,
    /// Local wall-clock time the schedule fires at
    pub time_of_day: NaiveTime,
    pub enabled: bool,
    #[serde(default)]
    pub filters: ScheduleFilters,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_status: Option<RunStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InventoryRecord {
        InventoryRecord {
            account_id: "acct".to_string(),
            sku: "BLUE-MUG-12".to_string(),
            location_name: "A-01-03".to_string(),
            quantity: 4,
            pickable: true,
            sellable: false,
            warehouse_identifier: "WH1".to_string(),
            product_name: "Blue mug".to_string(),
            barcode: Some("0123".to_string()),
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        assert!(ScheduleFilters::default().matches(&record()));
    }

    #[test]
    fn every_set_filter_must_match() {
        let filters = ScheduleFilters {
            warehouse: Some("WH1".to_string()),
            location_prefix: Some("A-01".to_string()),
            sku_contains: Some("MUG".to_string()),
            pickable: Some(true),
            sellable: Some(false),
            min_quantity: Some(4),
        };
        assert!(filters.matches(&record()));

        let filters = ScheduleFilters {
            sellable: Some(true),
            ..Default::default()
        };
        assert!(!filters.matches(&record()));

        let filters = ScheduleFilters {
            min_quantity: Some(5),
            ..Default::default()
        };
        assert!(!filters.matches(&record()));
    }

    #[test]
    fn schedule_deserializes_short_weekday_names() {
        let schedule: Schedule = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "name": "Morning stock",
            "account_id": "acct",
            "email": "ops@example.com",
            "days_of_week": ["Mon", "Wed"],
            "time_of_day": "14:00:00",
            "enabled": true
        }))
        .unwrap();

        assert_eq!(schedule.days_of_week, vec![Weekday::Mon, Weekday::Wed]);
        assert_eq!(schedule.mode, SyncMode::Live);
        assert!(schedule.last_run_at.is_none());
        assert!(schedule.validate().is_ok());
    }
}
