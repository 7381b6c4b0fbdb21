use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marketplace sync state of a local product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Success => "success",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BatchStatus::Pending),
            "processing" => Some(BatchStatus::Processing),
            "success" => Some(BatchStatus::Success),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    /// Whether a record in this state may be picked up for submission.
    pub fn is_submittable(&self, include_failed: bool) -> bool {
        match self {
            BatchStatus::Pending => true,
            BatchStatus::Failed => include_failed,
            BatchStatus::Processing | BatchStatus::Success => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute assignment. The marketplace accepts either a value id from
/// the category's value list or a free-text value for custom attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductAttribute {
    pub attribute_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_value: Option<String>,
}

impl ProductAttribute {
    pub fn has_value(&self) -> bool {
        self.value_id.is_some()
            || self
                .custom_value
                .as_deref()
                .is_some_and(|v| !v.trim().is_empty())
    }
}

/// A product as produced by ingestion, before any sync state exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewProduct {
    pub barcode: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub product_main_id: String,
    pub stock_code: String,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub brand_name: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub brand_id: Option<i64>,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub price: f64,
    #[serde(default)]
    pub list_price: Option<f64>,
    #[serde(default)]
    pub stock: i64,
    #[serde(default = "default_vat_rate")]
    pub vat_rate: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_vat_rate() -> i64 {
    18
}

fn default_currency() -> String {
    "TRY".to_string()
}

/// A local product together with its sync state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub id: i64,
    pub barcode: String,
    pub title: String,
    pub description: String,
    pub product_main_id: String,
    pub stock_code: String,
    pub category_name: String,
    pub brand_name: String,
    pub category_id: Option<i64>,
    pub brand_id: Option<i64>,
    pub attributes: Vec<ProductAttribute>,
    pub image_urls: Vec<String>,
    pub price: f64,
    pub list_price: Option<f64>,
    pub stock: i64,
    pub vat_rate: i64,
    pub currency: String,
    pub batch_status: BatchStatus,
    pub batch_handle: Option<String>,
    pub status_message: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product body in the marketplace's `createProducts` schema.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub barcode: String,
    pub title: String,
    pub product_main_id: String,
    pub brand_id: i64,
    pub category_id: i64,
    pub quantity: i64,
    pub stock_code: String,
    pub description: String,
    pub currency_type: String,
    pub list_price: f64,
    pub sale_price: f64,
    pub vat_rate: i64,
    pub images: Vec<PayloadImage>,
    pub attributes: Vec<PayloadAttribute>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PayloadImage {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttribute {
    pub attribute_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_value_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_attribute_value: Option<String>,
}

/// Marketplace category, flattened out of the category tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub is_leaf: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Brand {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryAttribute {
    pub id: i64,
    pub name: String,
    pub required: bool,
    pub allow_custom: bool,
    pub values: Vec<(i64, String)>,
}

/// Overall state of a submitted batch as reported by the marketplace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    InProgress,
    Done,
    Failed,
    Unknown(String),
}

impl BatchState {
    pub fn from_marketplace(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" | "DONE" | "SUCCESS" => BatchState::Done,
            "FAILED" | "REJECTED" | "ERROR" => BatchState::Failed,
            "IN_PROGRESS" | "PROCESSING" | "PENDING" | "CREATED" => BatchState::InProgress,
            _ => BatchState::Unknown(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Success,
    Failed,
    Pending(String),
}

impl ItemStatus {
    pub fn from_marketplace(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => ItemStatus::Success,
            "FAILED" | "INVALID" | "ERROR" => ItemStatus::Failed,
            _ => ItemStatus::Pending(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub barcode: String,
    pub status: ItemStatus,
    pub failure_reasons: Vec<String>,
}

/// Answer to a batch status poll. Some reports carry per-item detail, some
/// only an aggregate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReport {
    Aggregate {
        state: BatchState,
        message: Option<String>,
    },
    PerItem {
        state: BatchState,
        entries: Vec<ItemResult>,
    },
}

impl BatchReport {
    pub fn state(&self) -> &BatchState {
        match self {
            BatchReport::Aggregate { state, .. } | BatchReport::PerItem { state, .. } => state,
        }
    }
}

/// Counters for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCycleResult {
    pub total_considered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub chunks_submitted: usize,
    pub batches_checked: usize,
}

impl fmt::Display for SyncCycleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "considered={} succeeded={} failed={} skipped={} chunks={} batches_checked={}",
            self.total_considered,
            self.succeeded,
            self.failed,
            self.skipped,
            self.chunks_submitted,
            self.batches_checked
        )
    }
}
