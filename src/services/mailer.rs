//! Report delivery for scheduled runs.
//!
//! Formatting and sending mail is handled outside this service; the
//! [`ReportMailer`] seam lets the binary plug in a real transport.

use crate::error::AppError;
use crate::models::{InventoryRecord, Schedule};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;

/// Aggregate figures for a filtered report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub rows: usize,
    pub skus: usize,
    pub total_quantity: i64,
}

impl ReportSummary {
    pub fn from_rows(rows: &[InventoryRecord]) -> Self {
        let skus: BTreeSet<&str> = rows.iter().map(|r| r.sku.as_str()).collect();
        Self {
            rows: rows.len(),
            skus: skus.len(),
            total_quantity: rows.iter().map(|r| r.quantity).sum(),
        }
    }
}

#[async_trait]
pub trait ReportMailer: Send + Sync {
    /// Deliver the filtered rows of a scheduled run to `schedule.email`.
    async fn send_report(&self, schedule: &Schedule, rows: &[InventoryRecord]) -> Result<(), AppError>;
}

/// Mailer that records the report in the log only.
pub struct LogMailer;

#[async_trait]
impl ReportMailer for LogMailer {
    async fn send_report(&self, schedule: &Schedule, rows: &[InventoryRecord]) -> Result<(), AppError> {
        let summary = ReportSummary::from_rows(rows);
        tracing::info!(
            schedule_id = %schedule.id,
            account_id = %schedule.account_id,
            email = %schedule.email,
            rows = summary.rows,
            skus = summary.skus,
            total_quantity = summary.total_quantity,
            "Inventory report ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn summary_counts_distinct_skus() {
        let row = |sku: &str, location: &str, quantity| InventoryRecord {
            account_id: "acct".into(),
            sku: sku.into(),
            location_name: location.into(),
            quantity,
            pickable: true,
            sellable: true,
            warehouse_identifier: "WH1".into(),
            product_name: String::new(),
            barcode: None,
            synced_at: Utc::now(),
        };

        let summary = ReportSummary::from_rows(&[row("MUG", "A", 2), row("MUG", "B", 3), row("CUP", "A", 0)]);
        assert_eq!(
            summary,
            ReportSummary {
                rows: 3,
                skus: 2,
                total_quantity: 5
            }
        );
    }
}
