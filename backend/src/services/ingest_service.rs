//! Bulk ingest and ledger reconciliation.
//!
//! Ordering contract: a row is inserted (durably) into its category store
//! before `record_membership` is called for it. A reader of the ledger can
//! therefore never see a membership whose row does not exist yet. A failure
//! between the two steps leaves a row without a ledger membership, which
//! `reconcile` detects and repairs.

use crate::error::{BulkAddFailure, IngestError};
use crate::models::{
    BulkAddResponse, Category, CheckDuplicatesResponse, DuplicateInfo, Membership,
    NormalizedVideo, ReconcileReport, SkipReason,
};
use crate::services::category_registry::CategoryRegistry;
use crate::services::storage::{DedupIndex, VideoStore};
use crate::utils::is_valid_video_id;
use log::{error, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

fn validate_video_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<(), IngestError> {
    let invalid: Vec<&str> = ids.into_iter().filter(|id| !is_valid_video_id(id)).collect();
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(IngestError::Validation(format!(
            "Invalid video ids: {}",
            invalid.join(", ")
        )))
    }
}

pub async fn check_duplicates(
    index: &dyn DedupIndex,
    video_ids: &[String],
) -> Result<CheckDuplicatesResponse, IngestError> {
    if video_ids.is_empty() {
        return Err(IngestError::Validation(
            "video_ids array is required".to_string(),
        ));
    }
    validate_video_ids(video_ids.iter().map(String::as_str))?;

    let found = index.check_duplicates(video_ids).await?;
    let duplicates = found
        .into_iter()
        .map(|(video_id, entry)| {
            let info = DuplicateInfo {
                categories: entry.categories.into_iter().collect(),
                first_added_to_category: entry.first_added_to_category,
            };
            (video_id, info)
        })
        .collect::<BTreeMap<_, _>>();

    info!(
        "Duplicate check: {} of {} ids already ingested",
        duplicates.len(),
        video_ids.len()
    );
    Ok(CheckDuplicatesResponse { duplicates })
}

fn note_batch_duplicates(outcome: &mut BulkAddResponse, batch_duplicates: &[String]) {
    for video_id in batch_duplicates {
        outcome
            .skipped
            .entry(video_id.clone())
            .or_insert(SkipReason::DuplicateInBatch);
    }
}

/// Insert every video of `videos` not yet in `category`.
///
/// Commits are per item. On a storage failure the returned
/// [`BulkAddFailure`] carries exactly the items committed before it.
pub async fn bulk_add(
    store: &dyn VideoStore,
    index: &dyn DedupIndex,
    category: &Category,
    videos: &[NormalizedVideo],
) -> Result<BulkAddResponse, BulkAddFailure> {
    if videos.is_empty() {
        return Err(IngestError::Validation("videos array is required".to_string()).into());
    }
    validate_video_ids(videos.iter().map(|v| v.video_id.as_str()))?;

    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(videos.len());
    let mut batch_duplicates = Vec::new();
    for video in videos {
        if seen.insert(video.video_id.as_str()) {
            unique.push(video);
        } else {
            batch_duplicates.push(video.video_id.clone());
        }
    }

    info!(
        "Bulk adding {} videos to {} ({} repeated in batch)",
        unique.len(),
        category.name,
        batch_duplicates.len()
    );

    // One ledger round trip for the whole batch.
    let ids: Vec<String> = unique.iter().map(|v| v.video_id.clone()).collect();
    let existing = index.check_duplicates(&ids).await?;

    let mut outcome = BulkAddResponse::default();
    for video in unique {
        let video_id = &video.video_id;
        let elsewhere: Vec<String> = match existing.get(video_id) {
            Some(entry) if entry.categories.contains(&category.id) => {
                outcome
                    .skipped
                    .insert(video_id.clone(), SkipReason::AlreadyInCategory);
                continue;
            }
            Some(entry) => entry.categories.iter().cloned().collect(),
            None => Vec::new(),
        };

        match store.insert(category, video).await {
            Ok(_) => {
                outcome.added.push(video_id.clone());
                if !elsewhere.is_empty() {
                    outcome
                        .already_in_categories
                        .insert(video_id.clone(), elsewhere);
                }
            }
            Err(IngestError::AlreadyExists { .. }) => {
                // Lost a race with a concurrent ingest: the other writer owns the row.
                warn!("Video {video_id} was inserted into {} concurrently", category.id);
                outcome
                    .skipped
                    .insert(video_id.clone(), SkipReason::AlreadyInCategory);
            }
            Err(e) => {
                error!("Failed to insert video {video_id} into {}: {e}", category.id);
                note_batch_duplicates(&mut outcome, &batch_duplicates);
                return Err(BulkAddFailure {
                    committed: outcome,
                    error: e,
                });
            }
        }

        // The row is durable at this point; recording is idempotent, so it is
        // also safe after losing the race above.
        if let Err(e) = index.record_membership(video_id, &category.id).await {
            error!(
                "Video {video_id} stored in {} but ledger update failed; reconciliation required: {e}",
                category.id
            );
            note_batch_duplicates(&mut outcome, &batch_duplicates);
            return Err(BulkAddFailure {
                committed: outcome,
                error: e,
            });
        }
    }

    note_batch_duplicates(&mut outcome, &batch_duplicates);
    info!(
        "Bulk add into {}: {} added, {} skipped",
        category.name,
        outcome.added.len(),
        outcome.skipped.len()
    );
    Ok(outcome)
}

/// Rebuild missing ledger memberships from the category stores.
///
/// The ledger snapshot is read before the stores are scanned, so every
/// membership in it already had its row committed; a membership without a
/// row is therefore a genuine orphan. Orphans are reported, never deleted.
pub async fn reconcile(
    store: &dyn VideoStore,
    index: &dyn DedupIndex,
    registry: &CategoryRegistry,
) -> Result<ReconcileReport, IngestError> {
    let ledger: HashMap<String, _> = index
        .entries()
        .await?
        .into_iter()
        .map(|entry| (entry.video_id.clone(), entry))
        .collect();

    let mut report = ReconcileReport::default();
    let mut stored = HashSet::new();

    for category in registry.all() {
        for video_id in store.video_ids(category).await? {
            report.scanned += 1;

            let recorded = ledger
                .get(&video_id)
                .is_some_and(|entry| entry.categories.contains(&category.id));
            if !recorded {
                index.record_membership(&video_id, &category.id).await?;
                report.repaired.push(Membership {
                    video_id: video_id.clone(),
                    category: category.id.clone(),
                });
            }
            stored.insert((video_id, category.id.clone()));
        }
    }

    for entry in ledger.values() {
        for category in &entry.categories {
            if !stored.contains(&(entry.video_id.clone(), category.clone())) {
                report.orphaned.push(Membership {
                    video_id: entry.video_id.clone(),
                    category: category.clone(),
                });
            }
        }
    }
    report.repaired.sort();
    report.orphaned.sort();

    info!(
        "Reconciliation scanned {} rows: {} repaired, {} orphaned",
        report.scanned,
        report.repaired.len(),
        report.orphaned.len()
    );
    Ok(report)
}
