//! Refresh pass orchestration.
//!
//! Walks every book in the record store, one at a time:
//!
//! 1. snapshot the record (scalars plus author and series lists);
//! 2. select the fields that need a lookup for this record;
//! 3. dispatch a lookup through the [`SearchCoordinator`] and wait for it;
//! 4. merge the result and write the update.
//!
//! Only one lookup is ever outstanding. The pass stops early when its
//! [`CancellationToken`] is cancelled, either from outside or because a
//! lookup reported cancellation; no merge happens after that point.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordinator::{Completion, LookupOutcome, SearchContext, SearchCoordinator};
use crate::db;
use crate::lookup::{create_lookup, LookupService, SearchQuery};
use crate::merge::{merge, ThumbnailAction};
use crate::models::{BookRow, Field, RecordSnapshot, ScalarField};
use crate::policy::FieldUsages;
use crate::progress::{NoProgress, ProgressMode, RefreshProgressEvent, RefreshProgressReporter};
use crate::select::select;
use crate::store::sqlite::SqliteRecordStore;
use crate::store::RecordStore;
use crate::thumbnails::{FsThumbnailStore, ThumbnailStore};

/// Shown when a lookup found nothing for a book.
pub const NOT_FOUND_NOTICE: &str = "Unable to find book details";

/// Narrowing options for a pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Only visit these row ids. Empty means every book.
    pub only: Vec<i64>,
    /// Stop after visiting this many books.
    pub limit: Option<usize>,
    /// Select and report, but never look up or write.
    pub dry_run: bool,
}

/// Counters for a finished (or stopped) pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Books visited, including the one whose lookup was cancelled.
    pub searched: u64,
    /// Books that needed a lookup.
    pub looked_up: u64,
    pub skipped: u64,
    pub not_found: u64,
    /// Books that had an update written.
    pub updated: u64,
    pub thumbnails_adopted: u64,
    pub field_errors: u64,
    pub cancelled: bool,
    /// Set when a precondition failed and no book was visited.
    pub aborted: Option<String>,
}

impl RefreshSummary {
    /// The final user-facing message.
    pub fn message(&self) -> String {
        if let Some(reason) = &self.aborted {
            return format!("Refresh aborted: {}", reason);
        }
        let searched = format!("{} books searched", self.searched);
        if self.cancelled {
            format!("Cancelled: {}", searched)
        } else {
            searched
        }
    }
}

/// One refresh over the record store.
pub struct RefreshPass {
    store: Arc<dyn RecordStore>,
    thumbnails: Arc<dyn ThumbnailStore>,
    coordinator: SearchCoordinator,
    requested: FieldUsages,
    progress: Box<dyn RefreshProgressReporter>,
    cancel: CancellationToken,
    options: RefreshOptions,
}

impl RefreshPass {
    pub fn new(
        store: Arc<dyn RecordStore>,
        thumbnails: Arc<dyn ThumbnailStore>,
        lookup: Arc<dyn LookupService>,
        requested: FieldUsages,
    ) -> Self {
        Self {
            store,
            thumbnails,
            coordinator: SearchCoordinator::new(lookup),
            requested,
            progress: Box::new(NoProgress),
            cancel: CancellationToken::new(),
            options: RefreshOptions::default(),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn RefreshProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_options(mut self, options: RefreshOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn report(&self, event: RefreshProgressEvent) {
        self.progress.report(event);
    }

    /// Run the pass to completion or cancellation.
    ///
    /// Store and thumbnail I/O errors abort the pass and are returned. A
    /// failed precondition is not an error: it is reported in the summary.
    pub async fn run(&self) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();

        if let Err(e) = self.thumbnails.check_writable() {
            tracing::error!("refresh precondition failed: {:#}", e);
            self.cancel.cancel();
            summary.aborted = Some(format!("{:#}", e));
            self.report(RefreshProgressEvent::Notice {
                message: summary.message(),
            });
            return Ok(summary);
        }

        let mut rows = self.store.fetch_all_records().await?;
        if !self.options.only.is_empty() {
            rows.retain(|r| self.options.only.contains(&r.row_id));
        }
        if let Some(limit) = self.options.limit {
            rows.truncate(limit);
        }

        tracing::info!(total = rows.len(), dry_run = self.options.dry_run, "refresh started");
        self.report(RefreshProgressEvent::Total {
            total: rows.len() as u64,
        });

        let result = self.walk(rows, &mut summary).await;

        self.report(RefreshProgressEvent::Status { message: None });
        summary.cancelled = self.cancel.is_cancelled();
        result?;

        tracing::info!(
            searched = summary.searched,
            updated = summary.updated,
            cancelled = summary.cancelled,
            "refresh finished"
        );
        self.report(RefreshProgressEvent::Notice {
            message: summary.message(),
        });
        Ok(summary)
    }

    async fn walk(&self, rows: Vec<BookRow>, summary: &mut RefreshSummary) -> Result<()> {
        for row in rows {
            if self.cancel.is_cancelled() {
                break;
            }
            summary.searched += 1;

            let (authors, series) = self
                .store
                .read_aux_lists(row.row_id)
                .await
                .with_context(|| format!("Failed to read lists for book {}", row.row_id))?;
            let snapshot = RecordSnapshot::from_row(row, authors, series);

            // Recomputed for every record.
            let usages = select(&self.requested, &snapshot, self.thumbnails.as_ref());
            let want_thumbnail = usages.wants_thumbnail();
            if want_thumbnail {
                self.thumbnails.discard_temp();
            }

            let query = if usages.is_empty() {
                None
            } else {
                SearchQuery::for_snapshot(&snapshot, want_thumbnail)
            };

            let status = match &query {
                Some(q) => q.label().to_string(),
                None => format!("Skipping {}", snapshot.scalar(ScalarField::Title)),
            };
            self.report(RefreshProgressEvent::Status {
                message: Some(status),
            });
            self.report(RefreshProgressEvent::Count { n: summary.searched });

            let Some(query) = query else {
                tracing::debug!(row_id = snapshot.row_id, fields = usages.len(), "skipping book");
                summary.skipped += 1;
                continue;
            };
            summary.looked_up += 1;

            if self.options.dry_run {
                tracing::debug!(
                    row_id = snapshot.row_id,
                    fields = ?usages.values().map(|u| u.field.name()).collect::<Vec<_>>(),
                    "would look up"
                );
                continue;
            }

            let in_flight = self
                .coordinator
                .dispatch(query, SearchContext { snapshot, usages })?;
            let completion = in_flight.await_completion().await?;
            self.finish_record(completion, summary).await?;
        }
        Ok(())
    }

    async fn finish_record(&self, completion: Completion, summary: &mut RefreshSummary) -> Result<()> {
        let Completion { context, outcome } = completion;
        let row_id = context.snapshot.row_id;

        let data = match outcome {
            LookupOutcome::Cancelled => {
                tracing::info!(row_id, "lookup reported cancellation");
                self.cancel.cancel();
                self.thumbnails.discard_temp();
                return Ok(());
            }
            LookupOutcome::NotFound => {
                tracing::warn!(row_id, "no details found");
                summary.not_found += 1;
                self.report(RefreshProgressEvent::Notice {
                    message: NOT_FOUND_NOTICE.to_string(),
                });
                return Ok(());
            }
            LookupOutcome::Found(data) => data,
        };

        if self.cancel.is_cancelled() {
            if let Some(temp) = &data.thumbnail {
                self.thumbnails.discard(temp)?;
            }
            return Ok(());
        }

        let merged = merge(&context.usages, data, &context.snapshot, self.thumbnails.as_ref());
        summary.field_errors += merged.errors.len() as u64;
        if merged.thumbnail == ThumbnailAction::Adopted {
            summary.thumbnails_adopted += 1;
        }

        if !merged.update.is_empty() {
            self.store
                .write_record(row_id, &merged.update, true)
                .await
                .with_context(|| format!("Failed to write book {}", row_id))?;
            summary.updated += 1;
            tracing::debug!(row_id, "book updated");
        }
        Ok(())
    }
}

/// `shelf refresh`: run a pass against the configured catalogue.
pub async fn run_refresh(
    config: &Config,
    fields: Option<Vec<Field>>,
    options: RefreshOptions,
    progress: ProgressMode,
) -> Result<()> {
    let mut requested = config.field_usages()?;
    if let Some(fields) = &fields {
        requested.restrict_to(fields);
    }

    let thumbnails = Arc::new(FsThumbnailStore::new(&config.thumbnails.dir));
    let lookup = create_lookup(&config.lookup, thumbnails.temp_path())?;
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteRecordStore::new(pool.clone()));

    let dry_run = options.dry_run;
    let pass = RefreshPass::new(store, thumbnails, lookup, requested)
        .with_progress(progress.reporter())
        .with_options(options);

    let cancel = pass.cancellation();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let summary = pass.run().await;
    ctrl_c.abort();
    pool.close().await;
    let summary = summary?;

    if dry_run {
        println!("refresh (dry-run)");
    } else {
        println!("refresh");
    }
    println!("  books searched: {}", summary.searched);
    println!("  lookups: {}", summary.looked_up);
    println!("  skipped: {}", summary.skipped);
    if !dry_run {
        println!("  not found: {}", summary.not_found);
        println!("  updated: {}", summary.updated);
        println!("  thumbnails adopted: {}", summary.thumbnails_adopted);
        println!("  field errors: {}", summary.field_errors);
    }
    println!("{}", summary.message());
    if summary.aborted.is_some() {
        anyhow::bail!("{}", summary.message());
    }
    Ok(())
}
