// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod inventory;
pub mod job;
pub mod schedule;
pub mod snapshot;

pub use inventory::{InventoryRecord, RecordOrigin};
pub use job::{SyncJob, SyncJobStatus};
pub use schedule::{RunStatus, Schedule, ScheduleFilters, SyncMode};
pub use snapshot::{SnapshotJob, SnapshotStatus};
