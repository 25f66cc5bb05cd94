//! Per-record field selection.
//!
//! Decides which of the requested fields actually need a lookup for one
//! record. The result is recomputed for every record and never cached.

use crate::models::{Field, RecordSnapshot};
use crate::policy::{FieldUsages, UsageMode};
use crate::thumbnails::ThumbnailStore;

/// Whether the stored value of `field` counts as blank for this record.
///
/// Scalars are blank when absent or empty; lists when empty; thumbnails when
/// the stored file is missing or zero-length.
pub fn is_blank(field: Field, snapshot: &RecordSnapshot, thumbnails: &dyn ThumbnailStore) -> bool {
    match field {
        Field::Scalar(s) => snapshot.scalars.get(&s).map_or(true, |v| v.is_empty()),
        Field::Authors => snapshot.authors.is_empty(),
        Field::Series => snapshot.series.is_empty(),
        Field::Thumbnail => thumbnails.probe(snapshot.row_id).is_blank(),
    }
}

/// Compute the subset of `requested` that needs a lookup for `snapshot`.
pub fn select(
    requested: &FieldUsages,
    snapshot: &RecordSnapshot,
    thumbnails: &dyn ThumbnailStore,
) -> FieldUsages {
    requested
        .values()
        .filter(|usage| usage.selected)
        .filter(|usage| match usage.mode {
            UsageMode::Overwrite | UsageMode::AddExtra => true,
            UsageMode::CopyIfBlank => is_blank(usage.field, snapshot, thumbnails),
        })
        .copied()
        .collect()
}
