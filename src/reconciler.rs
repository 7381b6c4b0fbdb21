//! Polls outstanding batch handles and settles the records under them.

use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, HandleMember, OutstandingHandle, Pool, StoreError};
use crate::gateway::{with_timeout, MarketplaceGateway};
use crate::model::{BatchReport, BatchState, ItemStatus};
use crate::sync::SyncOptions;

const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub batches_checked: usize,
    pub succeeded: usize,
    /// Includes records failed by poll exhaustion.
    pub failed: usize,
    pub exhausted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Succeed { id: i64 },
    Fail { id: i64, message: String },
}

fn clip(text: &str) -> String {
    text.chars().take(MAX_MESSAGE_CHARS).collect()
}

fn item_failure_text(reasons: &[String]) -> String {
    let joined = reasons
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if joined.is_empty() {
        "item failed without specific reason".to_string()
    } else {
        clip(&joined)
    }
}

/// Decide which members of a batch move where. Members the report says
/// nothing final about are left out.
pub fn resolve_report(report: &BatchReport, members: &[HandleMember]) -> Vec<Transition> {
    match report {
        BatchReport::Aggregate {
            state: BatchState::Done,
            ..
        } => members
            .iter()
            .map(|m| Transition::Succeed { id: m.id })
            .collect(),
        BatchReport::Aggregate {
            state: BatchState::Failed,
            message,
        } => {
            let message = message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(clip)
                .unwrap_or_else(|| "batch failed".to_string());
            members
                .iter()
                .map(|m| Transition::Fail {
                    id: m.id,
                    message: message.clone(),
                })
                .collect()
        }
        BatchReport::Aggregate { .. } => Vec::new(),
        BatchReport::PerItem { entries, .. } => members
            .iter()
            .filter_map(|m| {
                let entry = entries.iter().find(|e| e.barcode == m.barcode)?;
                match entry.status {
                    ItemStatus::Success => Some(Transition::Succeed { id: m.id }),
                    ItemStatus::Failed => Some(Transition::Fail {
                        id: m.id,
                        message: item_failure_text(&entry.failure_reasons),
                    }),
                    ItemStatus::Pending(_) => None,
                }
            })
            .collect(),
    }
}

/// Poll up to `max_batches` outstanding handles not in `exclude`. The first
/// store error aborts the remaining polls.
#[instrument(skip_all, fields(excluded = exclude.len()))]
pub async fn reconcile(
    pool: &Pool,
    gateway: &dyn MarketplaceGateway,
    opts: &SyncOptions,
    exclude: &HashSet<String>,
) -> Result<ReconcileOutcome, StoreError> {
    let selected: Vec<OutstandingHandle> = db::outstanding_handles(pool)
        .await?
        .into_iter()
        .filter(|h| !exclude.contains(&h.handle))
        .take(opts.max_batches)
        .collect();

    let initial = ReconcileOutcome {
        batches_checked: selected.len(),
        ..Default::default()
    };
    if selected.is_empty() {
        debug!("no outstanding batches");
        return Ok(initial);
    }

    let outcome = stream::iter(selected)
        .map(|handle| reconcile_handle(pool, gateway, opts, handle))
        .buffer_unordered(opts.poll_concurrency.max(1))
        .try_fold(initial, |mut acc, one| async move {
            acc.succeeded += one.succeeded;
            acc.failed += one.failed;
            acc.exhausted += one.exhausted;
            Ok(acc)
        })
        .await?;

    info!(
        batches = outcome.batches_checked,
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        exhausted = outcome.exhausted,
        "reconciliation finished"
    );
    Ok(outcome)
}

#[instrument(skip_all, fields(handle = %handle.handle))]
async fn reconcile_handle(
    pool: &Pool,
    gateway: &dyn MarketplaceGateway,
    opts: &SyncOptions,
    handle: OutstandingHandle,
) -> Result<ReconcileOutcome, StoreError> {
    let members = db::processing_members(pool, &handle.handle).await?;

    let transitions = match with_timeout(
        opts.request_timeout,
        gateway.get_batch_status(&handle.handle),
    )
    .await
    {
        Ok(report) => {
            debug!(state = ?report.state(), "batch status received");
            resolve_report(&report, &members)
        }
        Err(err) => {
            warn!(error = %err, "batch status poll failed");
            Vec::new()
        }
    };

    let now = Utc::now();
    let mut out = ReconcileOutcome::default();
    let mut tx = pool.begin().await?;
    for transition in &transitions {
        match transition {
            Transition::Succeed { id } => {
                if db::mark_success_tx(&mut tx, *id, &handle.handle, now).await? {
                    out.succeeded += 1;
                }
            }
            Transition::Fail { id, message } => {
                if db::mark_failed_tx(&mut tx, *id, &handle.handle, message, now).await? {
                    out.failed += 1;
                }
            }
        }
    }

    let polls = db::record_poll_tx(&mut tx, &handle.handle, now).await?;
    if polls >= i64::from(opts.max_poll_cycles) {
        let message = format!(
            "poll exhausted: batch {} unresolved after {polls} polls",
            handle.handle
        );
        let exhausted = db::fail_open_under_handle_tx(&mut tx, &handle.handle, &message, now).await?;
        if exhausted > 0 {
            warn!(polls, records = exhausted, "giving up on unresolved batch");
            out.failed += exhausted as usize;
            out.exhausted += exhausted as usize;
        }
    }
    tx.commit().await?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemResult;

    fn members() -> Vec<HandleMember> {
        ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, b)| HandleMember {
                id: i as i64 + 1,
                barcode: b.to_string(),
            })
            .collect()
    }

    fn item(barcode: &str, status: ItemStatus, reasons: &[&str]) -> ItemResult {
        ItemResult {
            barcode: barcode.into(),
            status,
            failure_reasons: reasons.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn aggregate_done_succeeds_everyone() {
        let report = BatchReport::Aggregate {
            state: BatchState::Done,
            message: None,
        };
        let out = resolve_report(&report, &members());
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|t| matches!(t, Transition::Succeed { .. })));
    }

    #[test]
    fn aggregate_failure_keeps_marketplace_message() {
        let report = BatchReport::Aggregate {
            state: BatchState::Failed,
            message: Some("invalid price".into()),
        };
        let out = resolve_report(&report, &members()[..1]);
        assert_eq!(
            out,
            vec![Transition::Fail {
                id: 1,
                message: "invalid price".into()
            }]
        );

        let report = BatchReport::Aggregate {
            state: BatchState::Failed,
            message: Some("  ".into()),
        };
        let out = resolve_report(&report, &members()[..1]);
        assert_eq!(
            out,
            vec![Transition::Fail {
                id: 1,
                message: "batch failed".into()
            }]
        );
    }

    #[test]
    fn in_progress_and_unknown_move_nothing() {
        for state in [BatchState::InProgress, BatchState::Unknown("??".into())] {
            let report = BatchReport::Aggregate {
                state,
                message: None,
            };
            assert!(resolve_report(&report, &members()).is_empty());
        }
    }

    #[test]
    fn per_item_resolves_by_barcode_and_leaves_the_rest() {
        let report = BatchReport::PerItem {
            state: BatchState::InProgress,
            entries: vec![
                item("A", ItemStatus::Success, &[]),
                item("B", ItemStatus::Failed, &["invalid price", "", "missing image"]),
                item("Z", ItemStatus::Success, &[]),
            ],
        };
        let out = resolve_report(&report, &members());
        assert_eq!(
            out,
            vec![
                Transition::Succeed { id: 1 },
                Transition::Fail {
                    id: 2,
                    message: "invalid price | missing image".into()
                },
            ]
        );
    }

    #[test]
    fn item_failure_text_is_bounded_and_defaulted() {
        assert_eq!(item_failure_text(&[]), "item failed without specific reason");
        let long = "x".repeat(800);
        assert_eq!(item_failure_text(&[long]).chars().count(), MAX_MESSAGE_CHARS);
    }
}
