//! Manual override guard
//!
//! Every write into the telemetry store is resolved here. Automatic ingestion
//! goes through [`resolve_upsert`], administrative corrections through
//! [`apply_edit`]; store implementations only persist the resolution.

use crate::error::{Result, SeasonError};
use crate::models::{ManualEdit, Metrics, TelemetryRecord, UpsertOutcome};

/// What a store must persist for an incoming automatic observation
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Insert(TelemetryRecord),
    Update(TelemetryRecord),
    Skip,
}

impl Resolution {
    pub fn outcome(&self) -> UpsertOutcome {
        match self {
            Resolution::Insert(_) => UpsertOutcome::Inserted,
            Resolution::Update(_) => UpsertOutcome::Applied,
            Resolution::Skip => UpsertOutcome::Skipped,
        }
    }

    pub fn record(&self) -> Option<&TelemetryRecord> {
        match self {
            Resolution::Insert(record) | Resolution::Update(record) => Some(record),
            Resolution::Skip => None,
        }
    }
}

pub fn is_protected(record: &TelemetryRecord) -> bool {
    record.manually_edited
}

/// Merge `incoming` metrics into `existing` unless it is protected.
///
/// Each metric follows its own [`crate::models::MergePolicy`]. Metrics absent
/// from `incoming` keep their stored value.
pub fn conditional_update(existing: &mut TelemetryRecord, incoming: &Metrics) -> UpsertOutcome {
    if is_protected(existing) {
        return UpsertOutcome::Skipped;
    }
    for (metric, value) in incoming.iter() {
        let merged = metric.merge_policy().merge(existing.metrics.get(metric), value);
        existing.metrics.set(metric, merged);
    }
    UpsertOutcome::Applied
}

/// Resolve an automatic observation against the stored record for the same key
pub fn resolve_upsert(
    existing: Option<TelemetryRecord>,
    incoming: TelemetryRecord,
) -> Result<Resolution> {
    incoming.validate()?;
    let mut incoming = incoming;
    // Ingestion never sets the protection flag
    incoming.manually_edited = false;

    let Some(mut stored) = existing else {
        return Ok(Resolution::Insert(incoming));
    };
    if stored.category != incoming.category
        || stored.player_tag != incoming.player_tag
        || stored.key != incoming.key
    {
        return Err(SeasonError::Internal {
            message: format!(
                "upsert key mismatch: {}/{}/{} vs {}/{}/{}",
                stored.category,
                stored.player_tag,
                stored.key,
                incoming.category,
                incoming.player_tag,
                incoming.key
            ),
        });
    }

    match conditional_update(&mut stored, &incoming.metrics) {
        UpsertOutcome::Skipped => Ok(Resolution::Skip),
        _ => {
            stored.observed_at = stored.observed_at.max(incoming.observed_at);
            Ok(Resolution::Update(stored))
        }
    }
}

/// Apply an administrative edit: values replace outright and the protection
/// flag is written together with them.
pub fn apply_edit(existing: Option<TelemetryRecord>, edit: &ManualEdit) -> Result<TelemetryRecord> {
    let mut record = match existing {
        Some(record) => record,
        None => TelemetryRecord::observed(
            edit.category,
            edit.player_tag.clone(),
            edit.key.clone(),
            edit.edited_at,
            Metrics::new(),
        ),
    };
    for (metric, value) in edit.metrics.iter() {
        record.metrics.set(metric, value);
    }
    record.manually_edited = edit.protect;
    record.validate()?;
    Ok(record)
}
