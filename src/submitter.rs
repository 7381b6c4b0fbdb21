//! Chunked submission of eligible records to the marketplace.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Pool, StoreError};
use crate::gateway::{with_timeout, GatewayError, MarketplaceGateway};
use crate::mapper::ProductMapper;
use crate::model::{BatchStatus, ProductRecord};
use crate::sync::SyncOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Records moved to `processing`.
    pub submitted: usize,
    /// Records moved to `failed` because their chunk was rejected.
    pub failed: usize,
    /// Records left `pending` because they could not be mapped.
    pub skipped: usize,
    /// Gateway submission calls made.
    pub chunks: usize,
    /// Handles accepted in this run, in submission order.
    pub handles: Vec<String>,
}

/// Submit `records` in chunks of `batch_size`. Records that are not
/// submittable under the current options are ignored even if the caller
/// passed them in.
#[instrument(skip_all, fields(records = records.len(), dry_run = opts.dry_run))]
pub async fn submit(
    pool: &Pool,
    gateway: &dyn MarketplaceGateway,
    mapper: &mut ProductMapper<'_>,
    records: &[ProductRecord],
    opts: &SyncOptions,
) -> Result<SubmitOutcome, StoreError> {
    let eligible: Vec<&ProductRecord> = records
        .iter()
        .filter(|r| r.batch_status.is_submittable(opts.include_failed))
        .collect();

    if opts.include_failed && !opts.dry_run {
        let retry: Vec<i64> = eligible
            .iter()
            .filter(|r| r.batch_status == BatchStatus::Failed)
            .map(|r| r.id)
            .collect();
        if !retry.is_empty() {
            let reset = db::reset_failed(pool, Some(retry.as_slice())).await?;
            info!(reset, "failed records queued for retry");
        }
    }

    let mut outcome = SubmitOutcome::default();
    for (index, chunk) in eligible.chunks(opts.batch_size.max(1)).enumerate() {
        let mut ids = Vec::with_capacity(chunk.len());
        let mut payloads = Vec::with_capacity(chunk.len());
        for record in chunk {
            match mapper.map(record).await {
                Ok(payload) => {
                    ids.push(record.id);
                    payloads.push(payload);
                }
                Err(err) => {
                    outcome.skipped += 1;
                    warn!(id = record.id, barcode = %record.barcode, error = %err, "product not mappable");
                    if !opts.dry_run {
                        db::set_pending_message(pool, record.id, &format!("mapping: {err}")).await?;
                    }
                }
            }
        }

        if payloads.is_empty() {
            debug!(chunk = index, "nothing mappable in chunk");
            continue;
        }
        if opts.dry_run {
            info!(chunk = index, items = payloads.len(), "dry run: chunk mapped, not submitted");
            continue;
        }

        if outcome.chunks > 0 && !opts.chunk_pause.is_zero() {
            tokio::time::sleep(opts.chunk_pause).await;
        }
        outcome.chunks += 1;

        let result = with_timeout(
            opts.request_timeout,
            gateway.create_or_update_products(&payloads),
        )
        .await
        .and_then(|handle| {
            if handle.trim().is_empty() {
                Err(GatewayError::Malformed("empty batch handle".into()))
            } else {
                Ok(handle)
            }
        });

        let now = Utc::now();
        match result {
            Ok(handle) => {
                let moved = db::mark_chunk_submitted(pool, &ids, &handle, now).await?;
                info!(chunk = index, %handle, items = moved, "chunk accepted");
                outcome.submitted += moved as usize;
                outcome.handles.push(handle);
            }
            Err(err) => {
                let failed = db::mark_chunk_failed(pool, &ids, &format!("gateway: {err}"), now).await?;
                warn!(chunk = index, items = failed, error = %err, "chunk submission failed");
                outcome.failed += failed as usize;
            }
        }
    }

    Ok(outcome)
}
