//! Merging looked-up data into a record.
//!
//! [`merge`] takes the per-record policy subset, the fetched data and the
//! snapshot taken before the lookup, and produces the [`UpdateSet`] to write.
//! Fetched fields without a policy in the subset are never written.
//!
//! Each field is merged on its own and yields a `Result`; a misconfigured
//! field is reported in [`MergeOutcome::errors`] while the others still merge.
//!
//! Thumbnails are not part of the update set. A fetched cover is moved into
//! place or deleted through the [`ThumbnailStore`] as part of the merge.

use std::path::Path;
use thiserror::Error;

use crate::models::{Author, FetchedData, Field, RecordSnapshot, ScalarField, Series, UpdateSet};
use crate::policy::{FieldUsage, FieldUsages, UsageMode};
use crate::thumbnails::ThumbnailStore;

/// A policy that cannot be applied to its field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldConfigError {
    #[error("illegal usage '{}' specified for field '{}'", .mode.label(), .field)]
    IllegalUsage { field: Field, mode: UsageMode },
}

/// One value that survived merging.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEntry {
    Scalar(ScalarField, String),
    Authors(Vec<Author>),
    Series(Vec<Series>),
}

/// What happened to a fetched cover image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThumbnailAction {
    /// No cover was fetched.
    #[default]
    None,
    /// Moved into place as the book's thumbnail.
    Adopted,
    /// Deleted; the stored thumbnail was kept.
    Discarded,
    /// The file operation failed; the stored thumbnail is unchanged.
    Failed,
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub update: UpdateSet,
    pub thumbnail: ThumbnailAction,
    pub errors: Vec<FieldConfigError>,
}

/// Merge `fetched` into `original` according to `policies`.
///
/// A failed thumbnail move or delete is logged and reported as
/// [`ThumbnailAction::Failed`]; the field updates are still returned.
pub fn merge(
    policies: &FieldUsages,
    mut fetched: FetchedData,
    original: &RecordSnapshot,
    thumbnails: &dyn ThumbnailStore,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    // A cover nobody asked for still has to be cleaned up.
    if let Some(temp) = fetched.thumbnail.take() {
        if policies.get(Field::Thumbnail).is_some_and(|u| u.selected) {
            fetched.thumbnail = Some(temp);
        } else {
            outcome.thumbnail = discard_cover(thumbnails, &temp, original.row_id);
        }
    }

    for usage in policies.values().filter(|u| u.selected) {
        if let Field::Thumbnail = usage.field {
            if let Some(temp) = fetched.thumbnail.take() {
                outcome.thumbnail = if should_adopt_thumbnail(usage, original, thumbnails) {
                    match thumbnails.adopt(&temp, original.row_id) {
                        Ok(()) => ThumbnailAction::Adopted,
                        Err(e) => {
                            tracing::warn!(row_id = original.row_id, "{:#}", e);
                            discard_cover(thumbnails, &temp, original.row_id);
                            ThumbnailAction::Failed
                        }
                    }
                } else {
                    discard_cover(thumbnails, &temp, original.row_id)
                };
            }
            continue;
        }

        match merge_field(usage, &mut fetched, original) {
            Ok(Some(entry)) => outcome.update.apply(entry),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(row_id = original.row_id, "{}", e);
                outcome.errors.push(e);
            }
        }
    }

    outcome
}

fn discard_cover(thumbnails: &dyn ThumbnailStore, temp: &Path, row_id: i64) -> ThumbnailAction {
    match thumbnails.discard(temp) {
        Ok(()) => ThumbnailAction::Discarded,
        Err(e) => {
            tracing::warn!(row_id, "{:#}", e);
            ThumbnailAction::Failed
        }
    }
}

fn should_adopt_thumbnail(
    usage: &FieldUsage,
    original: &RecordSnapshot,
    thumbnails: &dyn ThumbnailStore,
) -> bool {
    match usage.mode {
        UsageMode::Overwrite => true,
        UsageMode::CopyIfBlank => thumbnails.probe(original.row_id).is_blank(),
        UsageMode::AddExtra => false,
    }
}

/// Merge one non-thumbnail field, taking its value out of `fetched`.
///
/// `Ok(None)` means the field is not written: either nothing was fetched for
/// it or the stored value wins.
pub fn merge_field(
    usage: &FieldUsage,
    fetched: &mut FetchedData,
    original: &RecordSnapshot,
) -> Result<Option<UpdateEntry>, FieldConfigError> {
    match usage.field {
        Field::Scalar(field) => {
            let Some(value) = fetched.scalars.remove(&field) else {
                return Ok(None);
            };
            match usage.mode {
                UsageMode::Overwrite => Ok(Some(UpdateEntry::Scalar(field, value))),
                UsageMode::CopyIfBlank => {
                    let stored = original.scalars.get(&field).is_some_and(|v| !v.is_empty());
                    Ok((!stored).then_some(UpdateEntry::Scalar(field, value)))
                }
                UsageMode::AddExtra => Err(FieldConfigError::IllegalUsage {
                    field: usage.field,
                    mode: usage.mode,
                }),
            }
        }
        Field::Authors => Ok(fetched
            .authors
            .take()
            .and_then(|list| merge_list(usage.mode, &original.authors, list))
            .map(UpdateEntry::Authors)),
        Field::Series => Ok(fetched
            .series
            .take()
            .and_then(|list| merge_list(usage.mode, &original.series, list))
            .map(UpdateEntry::Series)),
        Field::Thumbnail => Ok(None),
    }
}

fn merge_list<T: Clone>(mode: UsageMode, original: &[T], fetched: Vec<T>) -> Option<Vec<T>> {
    match mode {
        UsageMode::Overwrite => Some(fetched),
        UsageMode::CopyIfBlank => original.is_empty().then_some(fetched),
        UsageMode::AddExtra => {
            let mut combined = original.to_vec();
            combined.extend(fetched);
            Some(combined)
        }
    }
}

impl UpdateSet {
    fn apply(&mut self, entry: UpdateEntry) {
        match entry {
            UpdateEntry::Scalar(field, value) => {
                self.scalars.insert(field, value);
            }
            UpdateEntry::Authors(list) => self.authors = Some(list),
            UpdateEntry::Series(list) => self.series = Some(list),
        }
    }
}
