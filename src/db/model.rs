//! View models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Sync logic
//! lives in the submitter and reconciler.

use chrono::{DateTime, Utc};

/// A batch handle that still has `processing` records under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingHandle {
    pub handle: String,
    pub open_items: i64,
    pub poll_count: i64,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Record slice the reconciler needs to match report entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleMember {
    pub id: i64,
    pub barcode: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub success: i64,
    pub failed: i64,
}
