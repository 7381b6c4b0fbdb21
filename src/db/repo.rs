use super::model::{HandleMember, OutstandingHandle, StatusCounts};
use super::StoreError;
use crate::model::{BatchStatus, NewProduct, ProductAttribute, ProductRecord};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

pub type Pool = SqlitePool;
type Result<T, E = StoreError> = std::result::Result<T, E>;

const SELECT_PRODUCT: &str = "SELECT id, barcode, title, description, product_main_id, stock_code, \
     category_name, brand_name, category_id, brand_id, attributes, image_urls, price, list_price, \
     stock, vat_rate, currency, batch_status, batch_handle, status_message, last_synced_at, \
     created_at, updated_at FROM products";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and create the parent
/// directory. Other schemes and in-memory URLs pass through unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn product_from_row(row: &SqliteRow) -> Result<ProductRecord> {
    let id: i64 = row.try_get("id")?;

    let status_raw: String = row.try_get("batch_status")?;
    let batch_status =
        BatchStatus::parse_status(&status_raw).ok_or_else(|| StoreError::Corrupt {
            id,
            column: "batch_status",
            detail: status_raw.clone(),
        })?;

    let attributes_raw: String = row.try_get("attributes")?;
    let attributes: Vec<ProductAttribute> =
        serde_json::from_str(&attributes_raw).map_err(|e| StoreError::Corrupt {
            id,
            column: "attributes",
            detail: e.to_string(),
        })?;

    let images_raw: String = row.try_get("image_urls")?;
    let image_urls: Vec<String> =
        serde_json::from_str(&images_raw).map_err(|e| StoreError::Corrupt {
            id,
            column: "image_urls",
            detail: e.to_string(),
        })?;

    Ok(ProductRecord {
        id,
        barcode: row.try_get("barcode")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        product_main_id: row.try_get("product_main_id")?,
        stock_code: row.try_get("stock_code")?,
        category_name: row.try_get("category_name")?,
        brand_name: row.try_get("brand_name")?,
        category_id: row.try_get("category_id")?,
        brand_id: row.try_get("brand_id")?,
        attributes,
        image_urls,
        price: row.try_get("price")?,
        list_price: row.try_get("list_price")?,
        stock: row.try_get("stock")?,
        vat_rate: row.try_get("vat_rate")?,
        currency: row.try_get("currency")?,
        batch_status,
        batch_handle: row.try_get("batch_handle")?,
        status_message: row.try_get("status_message")?,
        last_synced_at: row.try_get("last_synced_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a product or refresh its catalog fields by barcode. Sync state of
/// an existing row is left alone.
#[instrument(skip_all, fields(barcode = %product.barcode))]
pub async fn upsert_product(pool: &Pool, product: &NewProduct) -> Result<i64> {
    let attributes = serde_json::to_string(&product.attributes)?;
    let image_urls = serde_json::to_string(&product.image_urls)?;
    let now = Utc::now();

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO products (barcode, title, description, product_main_id, stock_code, \
             category_name, brand_name, category_id, brand_id, attributes, image_urls, price, \
             list_price, stock, vat_rate, currency, batch_status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?) \
         ON CONFLICT(barcode) DO UPDATE SET \
             title = excluded.title, description = excluded.description, \
             product_main_id = excluded.product_main_id, stock_code = excluded.stock_code, \
             category_name = excluded.category_name, brand_name = excluded.brand_name, \
             category_id = excluded.category_id, brand_id = excluded.brand_id, \
             attributes = excluded.attributes, image_urls = excluded.image_urls, \
             price = excluded.price, list_price = excluded.list_price, stock = excluded.stock, \
             vat_rate = excluded.vat_rate, currency = excluded.currency, \
             updated_at = excluded.updated_at \
         RETURNING id",
    )
    .bind(&product.barcode)
    .bind(&product.title)
    .bind(&product.description)
    .bind(&product.product_main_id)
    .bind(&product.stock_code)
    .bind(&product.category_name)
    .bind(&product.brand_name)
    .bind(product.category_id)
    .bind(product.brand_id)
    .bind(attributes)
    .bind(image_urls)
    .bind(product.price)
    .bind(product.list_price)
    .bind(product.stock)
    .bind(product.vat_rate)
    .bind(&product.currency)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn fetch_product(pool: &Pool, id: i64) -> Result<Option<ProductRecord>> {
    let sql = format!("{SELECT_PRODUCT} WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(product_from_row).transpose()
}

pub async fn fetch_product_by_barcode(pool: &Pool, barcode: &str) -> Result<Option<ProductRecord>> {
    let sql = format!("{SELECT_PRODUCT} WHERE barcode = ?");
    let row = sqlx::query(&sql).bind(barcode).fetch_optional(pool).await?;
    row.as_ref().map(product_from_row).transpose()
}

/// Records eligible for submission, oldest first. `processing` and `success`
/// rows are never returned.
#[instrument(skip_all)]
pub async fn select_eligible(
    pool: &Pool,
    limit: u32,
    include_failed: bool,
) -> Result<Vec<ProductRecord>> {
    let sql = format!(
        "{SELECT_PRODUCT} WHERE batch_status = 'pending' OR (? AND batch_status = 'failed') \
         ORDER BY id ASC LIMIT ?"
    );
    let rows = sqlx::query(&sql)
        .bind(include_failed)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;
    rows.iter().map(product_from_row).collect()
}

/// Attach a diagnostic to a record that could not be mapped. Only touches
/// rows that are still `pending`.
#[instrument(skip_all)]
pub async fn set_pending_message(pool: &Pool, id: i64, message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE products SET status_message = ?, updated_at = ? \
         WHERE id = ? AND batch_status = 'pending'",
    )
    .bind(message)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Move `failed` records back to `pending` with a cleared handle and
/// message. `None` resets every failed record.
#[instrument(skip_all)]
pub async fn reset_failed(pool: &Pool, ids: Option<&[i64]>) -> Result<u64> {
    let now = Utc::now();
    let Some(ids) = ids else {
        let res = sqlx::query(
            "UPDATE products SET batch_status = 'pending', batch_handle = NULL, \
             status_message = NULL, updated_at = ? WHERE batch_status = 'failed'",
        )
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(res.rows_affected());
    };

    let mut tx = pool.begin().await?;
    let mut reset = 0;
    for id in ids {
        reset += sqlx::query(
            "UPDATE products SET batch_status = 'pending', batch_handle = NULL, \
             status_message = NULL, updated_at = ? WHERE id = ? AND batch_status = 'failed'",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(reset)
}

/// Record an accepted chunk: register the handle and move every still-pending
/// record of the chunk to `processing` under it, atomically.
#[instrument(skip_all, fields(handle = %handle, items = ids.len()))]
pub async fn mark_chunk_submitted(
    pool: &Pool,
    ids: &[i64],
    handle: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO batch_handles (handle, item_count, poll_count, submitted_at) \
         VALUES (?, ?, 0, ?) \
         ON CONFLICT(handle) DO UPDATE SET item_count = item_count + excluded.item_count",
    )
    .bind(handle)
    .bind(ids.len() as i64)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let mut moved = 0;
    for id in ids {
        moved += sqlx::query(
            "UPDATE products SET batch_status = 'processing', batch_handle = ?, \
             status_message = NULL, updated_at = ? WHERE id = ? AND batch_status = 'pending'",
        )
        .bind(handle)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(moved)
}

/// Mark every still-pending record of a rejected chunk as `failed`.
#[instrument(skip_all, fields(items = ids.len()))]
pub async fn mark_chunk_failed(
    pool: &Pool,
    ids: &[i64],
    message: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut failed = 0;
    for id in ids {
        failed += sqlx::query(
            "UPDATE products SET batch_status = 'failed', status_message = ?, updated_at = ? \
             WHERE id = ? AND batch_status = 'pending'",
        )
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(failed)
}

/// Distinct handles with `processing` records, oldest submission first.
#[instrument(skip_all)]
pub async fn outstanding_handles(pool: &Pool) -> Result<Vec<OutstandingHandle>> {
    let rows = sqlx::query(
        "SELECT p.batch_handle AS handle, COUNT(*) AS open_items, \
                COALESCE(MAX(h.poll_count), 0) AS poll_count, \
                MAX(h.submitted_at) AS submitted_at \
         FROM products p \
         LEFT JOIN batch_handles h ON h.handle = p.batch_handle \
         WHERE p.batch_status = 'processing' AND p.batch_handle IS NOT NULL \
         GROUP BY p.batch_handle \
         ORDER BY MAX(h.submitted_at) IS NULL, MAX(h.submitted_at) ASC, MIN(h.rowid) ASC, \
                  p.batch_handle ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<OutstandingHandle> {
            Ok(OutstandingHandle {
                handle: row.try_get("handle")?,
                open_items: row.try_get("open_items")?,
                poll_count: row.try_get("poll_count")?,
                submitted_at: row.try_get("submitted_at")?,
            })
        })
        .collect()
}

/// Records still `processing` under `handle`.
pub async fn processing_members(pool: &Pool, handle: &str) -> Result<Vec<HandleMember>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT id, barcode FROM products \
         WHERE batch_handle = ? AND batch_status = 'processing' ORDER BY id ASC",
    )
    .bind(handle)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, barcode)| HandleMember { id, barcode })
        .collect())
}

/// `processing` → `success` for one record, only if it is still under `handle`.
pub async fn mark_success_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    handle: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE products SET batch_status = 'success', status_message = NULL, \
         last_synced_at = ?, updated_at = ? \
         WHERE id = ? AND batch_status = 'processing' AND batch_handle = ?",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .bind(handle)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// `processing` → `failed` for one record, only if it is still under `handle`.
pub async fn mark_failed_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    handle: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE products SET batch_status = 'failed', status_message = ?, updated_at = ? \
         WHERE id = ? AND batch_status = 'processing' AND batch_handle = ?",
    )
    .bind(message)
    .bind(now)
    .bind(id)
    .bind(handle)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Count one poll attempt against `handle` and return the new total.
pub async fn record_poll_tx(
    tx: &mut Transaction<'_, Sqlite>,
    handle: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let polls: i64 = sqlx::query_scalar(
        "INSERT INTO batch_handles (handle, item_count, poll_count, submitted_at, last_polled_at) \
         VALUES (?, 0, 1, ?, ?) \
         ON CONFLICT(handle) DO UPDATE SET poll_count = poll_count + 1, \
             last_polled_at = excluded.last_polled_at \
         RETURNING poll_count",
    )
    .bind(handle)
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(polls)
}

/// Fail every record still `processing` under `handle`.
pub async fn fail_open_under_handle_tx(
    tx: &mut Transaction<'_, Sqlite>,
    handle: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE products SET batch_status = 'failed', status_message = ?, updated_at = ? \
         WHERE batch_handle = ? AND batch_status = 'processing'",
    )
    .bind(message)
    .bind(now)
    .bind(handle)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn count_by_status(pool: &Pool) -> Result<StatusCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT batch_status, COUNT(*) FROM products GROUP BY batch_status")
            .fetch_all(pool)
            .await?;
    let mut counts = StatusCounts::default();
    for (status, n) in rows {
        match BatchStatus::parse_status(&status) {
            Some(BatchStatus::Pending) => counts.pending = n,
            Some(BatchStatus::Processing) => counts.processing = n,
            Some(BatchStatus::Success) => counts.success = n,
            Some(BatchStatus::Failed) => counts.failed = n,
            None => {}
        }
    }
    Ok(counts)
}
