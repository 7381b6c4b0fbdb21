//! One sync cycle: select, submit, then reconcile older batches.

use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, instrument};

use crate::db::{self, Pool, StoreError};
use crate::gateway::MarketplaceGateway;
use crate::mapper::ProductMapper;
use crate::model::SyncCycleResult;
use crate::{reconciler, submitter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_items: u32,
    pub batch_size: usize,
    pub include_failed: bool,
    /// Map and report only: no submission, no poll, no store write. Catalog
    /// lookups still reach the gateway so mapping failures are real.
    pub dry_run: bool,
    pub chunk_pause: Duration,
    pub request_timeout: Duration,
    pub max_batches: usize,
    pub max_poll_cycles: u32,
    pub poll_concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_items: 100,
            batch_size: 10,
            include_failed: false,
            dry_run: false,
            chunk_pause: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            max_batches: 100,
            max_poll_cycles: 10,
            poll_concurrency: 4,
        }
    }
}

/// Run one full cycle. Gateway failures are absorbed into record state; only
/// store failures abort the cycle.
#[instrument(skip_all, fields(dry_run = opts.dry_run, include_failed = opts.include_failed))]
pub async fn run_cycle(
    pool: &Pool,
    gateway: &dyn MarketplaceGateway,
    opts: &SyncOptions,
) -> Result<SyncCycleResult, StoreError> {
    let records = db::select_eligible(pool, opts.max_items, opts.include_failed).await?;
    let mut result = SyncCycleResult {
        total_considered: records.len(),
        ..Default::default()
    };

    // Catalog lookups are cached for this cycle only.
    let mut mapper = ProductMapper::new(gateway, opts.request_timeout);
    let submitted = submitter::submit(pool, gateway, &mut mapper, &records, opts).await?;
    result.succeeded += submitted.submitted;
    result.failed += submitted.failed;
    result.skipped += submitted.skipped;
    result.chunks_submitted += submitted.chunks;

    if opts.dry_run {
        info!(%result, "dry run finished");
        return Ok(result);
    }

    let fresh: HashSet<String> = submitted.handles.into_iter().collect();
    let reconciled = reconciler::reconcile(pool, gateway, opts, &fresh).await?;
    result.batches_checked = reconciled.batches_checked;
    result.succeeded += reconciled.succeeded;
    result.failed += reconciled.failed;

    info!(%result, "sync cycle finished");
    Ok(result)
}
