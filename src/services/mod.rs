// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync pipeline and remote API layers.

pub mod graphql;
pub mod inventory;
pub mod jobs;
pub mod mailer;
pub mod pagination;
pub mod schedule;
pub mod snapshot;
pub mod sync;
pub mod token;

pub use graphql::{GraphqlClient, RetryPolicy};
pub use inventory::{AccountSync, InventorySync, SyncSummary};
pub use jobs::{JobRegistry, JobStore, LogProgress, MemoryJobStore, ProgressSink};
pub use mailer::{LogMailer, ReportMailer};
pub use pagination::{FetchLimits, PageFetcher, PageRequest, StopReason};
pub use schedule::{due_schedules, ScheduleRunner};
pub use snapshot::{AbortOutcome, PollSettings, SnapshotController};
pub use sync::{ReplaceReport, SyncPipeline};
pub use token::{AccessTokenProvider, StaticToken, TokenManager};
