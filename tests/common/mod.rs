#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use catalog_sync::db::{self, Pool};
use catalog_sync::gateway::{GatewayError, MarketplaceGateway};
use catalog_sync::model::{
    BatchReport, BatchState, Brand, Category, CategoryAttribute, NewProduct, ProductAttribute,
    ProductRecord, SubmissionPayload,
};
use catalog_sync::sync::SyncOptions;

pub const TSHIRT: i64 = 411;
pub const LCW: i64 = 7651;
pub const COLOR: i64 = 47;

pub async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn product(barcode: &str) -> NewProduct {
    NewProduct {
        barcode: barcode.into(),
        title: format!("Tee {barcode}"),
        description: "100% cotton".into(),
        product_main_id: format!("M-{barcode}"),
        stock_code: format!("S-{barcode}"),
        category_name: "T-Shirt".into(),
        brand_name: "LCW".into(),
        category_id: None,
        brand_id: None,
        attributes: vec![ProductAttribute {
            attribute_id: COLOR,
            value_id: Some(1001),
            custom_value: None,
        }],
        image_urls: vec![format!("https://cdn.example/{barcode}.jpg")],
        price: 199.9,
        list_price: Some(249.9),
        stock: 3,
        vat_rate: 18,
        currency: "TRY".into(),
    }
}

pub async fn seed(pool: &Pool, barcodes: &[&str]) -> Vec<i64> {
    let mut ids = Vec::new();
    for b in barcodes {
        ids.push(db::upsert_product(pool, &product(b)).await.unwrap());
    }
    ids
}

pub async fn record(pool: &Pool, barcode: &str) -> ProductRecord {
    db::fetch_product_by_barcode(pool, barcode)
        .await
        .unwrap()
        .unwrap()
}

pub fn fast_opts() -> SyncOptions {
    SyncOptions {
        chunk_pause: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Rows that are in flight or done but carry no handle. Must always be zero.
pub async fn handleless_submitted(pool: &Pool) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM products \
         WHERE batch_status IN ('processing', 'success') AND batch_handle IS NULL",
    )
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Scripted gateway. Unscripted submissions are accepted as `batch-<n>`;
/// unscripted polls report the batch as still in progress.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    submit_responses: Arc<Mutex<VecDeque<Result<String, GatewayError>>>>,
    status_responses: Arc<Mutex<HashMap<String, VecDeque<Result<BatchReport, GatewayError>>>>>,
    submit_calls: Arc<Mutex<Vec<Vec<String>>>>,
    status_calls: Arc<Mutex<Vec<String>>>,
    catalog_calls: Arc<Mutex<usize>>,
    submit_times: Arc<Mutex<Vec<Instant>>>,
    submit_delay: Option<Duration>,
}

impl RecordingGateway {
    pub fn with_submit_responses(responses: Vec<Result<String, GatewayError>>) -> Self {
        Self {
            submit_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    /// Every submission takes `delay` before answering.
    pub fn with_submit_delay(delay: Duration) -> Self {
        Self {
            submit_delay: Some(delay),
            ..Default::default()
        }
    }

    pub async fn script_status(&self, handle: &str, response: Result<BatchReport, GatewayError>) {
        self.status_responses
            .lock()
            .await
            .entry(handle.to_string())
            .or_default()
            .push_back(response);
    }

    /// Barcodes of each submitted chunk, in call order.
    pub async fn submit_calls(&self) -> Vec<Vec<String>> {
        self.submit_calls.lock().await.clone()
    }

    pub async fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().await.clone()
    }

    /// When each submission call arrived.
    pub async fn submit_times(&self) -> Vec<Instant> {
        self.submit_times.lock().await.clone()
    }

    pub async fn catalog_calls(&self) -> usize {
        *self.catalog_calls.lock().await
    }
}

#[async_trait]
impl MarketplaceGateway for RecordingGateway {
    async fn create_or_update_products(
        &self,
        items: &[SubmissionPayload],
    ) -> Result<String, GatewayError> {
        self.submit_times.lock().await.push(Instant::now());
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        let n = {
            let mut calls = self.submit_calls.lock().await;
            calls.push(items.iter().map(|p| p.barcode.clone()).collect());
            calls.len()
        };
        let scripted = self.submit_responses.lock().await.pop_front();
        scripted.unwrap_or_else(|| Ok(format!("batch-{n}")))
    }

    async fn get_batch_status(&self, handle: &str) -> Result<BatchReport, GatewayError> {
        self.status_calls.lock().await.push(handle.to_string());
        let scripted = self
            .status_responses
            .lock()
            .await
            .get_mut(handle)
            .and_then(|q| q.pop_front());
        scripted.unwrap_or(Ok(BatchReport::Aggregate {
            state: BatchState::InProgress,
            message: None,
        }))
    }

    async fn list_categories(&self) -> Result<Vec<Category>, GatewayError> {
        *self.catalog_calls.lock().await += 1;
        Ok(vec![
            Category {
                id: 400,
                name: "Clothing".into(),
                parent_id: None,
                is_leaf: false,
            },
            Category {
                id: TSHIRT,
                name: "T-Shirt".into(),
                parent_id: Some(400),
                is_leaf: true,
            },
        ])
    }

    async fn list_brands(&self) -> Result<Vec<Brand>, GatewayError> {
        *self.catalog_calls.lock().await += 1;
        Ok(vec![Brand {
            id: LCW,
            name: "LCW".into(),
        }])
    }

    async fn get_category_attributes(
        &self,
        category_id: i64,
    ) -> Result<Vec<CategoryAttribute>, GatewayError> {
        *self.catalog_calls.lock().await += 1;
        if category_id != TSHIRT {
            return Ok(vec![]);
        }
        Ok(vec![CategoryAttribute {
            id: COLOR,
            name: "Color".into(),
            required: true,
            allow_custom: false,
            values: vec![(1001, "Black".into())],
        }])
    }
}
