// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Inventory cache row for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// One SKU at one bin location, as mirrored into the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct InventoryRecord {
    /// Account the row belongs to (scope of cache replacement)
    #[validate(length(min = 1))]
    pub account_id: String,
    #[validate(length(min = 1))]
    pub sku: String,
    /// Bin/location name inside the warehouse
    #[validate(length(min = 1))]
    pub location_name: String,
    /// Units on hand at this location
    pub quantity: i64,
    pub pickable: bool,
    pub sellable: bool,
    pub warehouse_identifier: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub barcode: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Document ID built from the composite unique key.
    ///
    /// Parts are URL-encoded so that `/` in bin names cannot create
    /// sub-collections.
    pub fn document_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            urlencoding::encode(&self.account_id),
            urlencoding::encode(&self.warehouse_identifier),
            urlencoding::encode(&self.sku),
            urlencoding::encode(&self.location_name)
        )
    }
}

/// Where a batch of records came from.
///
/// Live fetches describe every known location ("library of locations") and
/// keep empty bins; manual uploads describe stock on hand and drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    LiveFetch,
    Snapshot,
    ManualUpload,
}
