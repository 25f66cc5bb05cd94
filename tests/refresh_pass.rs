//! Refresh pass behaviour against the in-memory record store and a scripted
//! lookup service that completes on its own thread.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use shelf_sync::coordinator::CompletionHandle;
use shelf_sync::lookup::{LookupService, SearchQuery};
use shelf_sync::models::{Author, FetchedData, Field, NewRecord, ScalarField, Series};
use shelf_sync::policy::{FieldUsage, FieldUsages, UsageMode};
use shelf_sync::progress::{RefreshProgressEvent, RefreshProgressReporter};
use shelf_sync::refresh::{RefreshOptions, RefreshPass, RefreshSummary, NOT_FOUND_NOTICE};
use shelf_sync::store::memory::InMemoryRecordStore;
use shelf_sync::store::RecordStore;
use shelf_sync::thumbnails::{FsThumbnailStore, ThumbnailStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TITLE: Field = Field::Scalar(ScalarField::Title);
const PUBLISHER: Field = Field::Scalar(ScalarField::Publisher);
const PAGES: Field = Field::Scalar(ScalarField::Pages);

enum Reply {
    Found(FetchedData),
    Cancel,
    /// Cancel the pass from outside, then deliver the data anyway.
    FoundAfterCancel(FetchedData, CancellationToken),
}

/// Completes lookups from a per-book script. Books without a script are not
/// found. A requested cover is copied from `cover` into the temp path.
struct ScriptedLookup {
    replies: Mutex<HashMap<i64, Reply>>,
    queries: Mutex<Vec<(i64, SearchQuery)>>,
    cover: Option<PathBuf>,
    temp: PathBuf,
}

impl ScriptedLookup {
    fn new(temp: PathBuf) -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            cover: None,
            temp,
        }
    }

    fn with_cover(mut self, cover: PathBuf) -> Self {
        self.cover = Some(cover);
        self
    }

    fn reply(self, row_id: i64, reply: Reply) -> Self {
        self.replies.lock().unwrap().insert(row_id, reply);
        self
    }

    fn searched_ids(&self) -> Vec<i64> {
        self.queries.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

impl LookupService for ScriptedLookup {
    fn search(&self, query: SearchQuery, completion: CompletionHandle) {
        let row_id = completion.row_id().unwrap_or_default();
        let reply = self.replies.lock().unwrap().remove(&row_id);
        let cover = self.cover.clone().filter(|_| query.want_thumbnail);
        let temp = self.temp.clone();
        self.queries.lock().unwrap().push((row_id, query));

        std::thread::spawn(move || match reply {
            Some(Reply::Found(mut data)) => {
                if let Some(cover) = cover {
                    fs::copy(cover, &temp).unwrap();
                    data.thumbnail = Some(temp);
                }
                completion.complete(Some(data), false);
            }
            Some(Reply::Cancel) => completion.complete(None, true),
            Some(Reply::FoundAfterCancel(mut data, token)) => {
                token.cancel();
                if let Some(cover) = cover {
                    fs::copy(cover, &temp).unwrap();
                    data.thumbnail = Some(temp);
                }
                completion.complete(Some(data), false);
            }
            None => completion.complete(None, false),
        });
    }
}

#[derive(Clone, Default)]
struct RecordingProgress(Arc<Mutex<Vec<RefreshProgressEvent>>>);

impl RecordingProgress {
    fn notices(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RefreshProgressEvent::Notice { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn statuses(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RefreshProgressEvent::Status { message } => message.clone(),
                _ => None,
            })
            .collect()
    }
}

impl RefreshProgressReporter for RecordingProgress {
    fn report(&self, event: RefreshProgressEvent) {
        self.0.lock().unwrap().push(event);
    }
}

struct Harness {
    tmp: TempDir,
    store: Arc<InMemoryRecordStore>,
    thumbnails: Arc<FsThumbnailStore>,
    progress: RecordingProgress,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let thumbnails = Arc::new(FsThumbnailStore::new(tmp.path().join("covers")));
        Self {
            tmp,
            store: Arc::new(InMemoryRecordStore::new()),
            thumbnails,
            progress: RecordingProgress::default(),
        }
    }

    fn lookup(&self) -> ScriptedLookup {
        ScriptedLookup::new(self.thumbnails.temp_path())
    }

    async fn add(&self, title: &str, isbn: &str, publisher: Option<&str>) -> i64 {
        let mut record = NewRecord::default();
        record.scalars.insert(ScalarField::Title, title.into());
        if !isbn.is_empty() {
            record.scalars.insert(ScalarField::Isbn, isbn.into());
        }
        if let Some(p) = publisher {
            record.scalars.insert(ScalarField::Publisher, p.into());
        }
        self.store.insert_record(&record).await.unwrap()
    }

    fn pass(&self, lookup: Arc<ScriptedLookup>, usages: FieldUsages) -> RefreshPass {
        RefreshPass::new(self.store.clone(), self.thumbnails.clone(), lookup, usages)
            .with_progress(Box::new(self.progress.clone()))
    }
}

fn usages(entries: &[(Field, UsageMode, bool)]) -> FieldUsages {
    entries
        .iter()
        .map(|(f, m, s)| FieldUsage::new(*f, *m, *s))
        .collect()
}

fn found(scalars: &[(ScalarField, &str)]) -> Reply {
    Reply::Found(FetchedData {
        scalars: scalars
            .iter()
            .map(|(f, v)| (*f, v.to_string()))
            .collect(),
        ..Default::default()
    })
}

#[tokio::test]
async fn only_selected_fields_are_written() {
    let h = Harness::new();
    let id = h.add("Mort", "0552131067", None).await;

    let lookup = Arc::new(h.lookup().reply(
        id,
        found(&[
            (ScalarField::Title, "MORT"),
            (ScalarField::Publisher, "Corgi"),
            (ScalarField::Pages, "272"),
        ]),
    ));
    let requested = usages(&[
        (TITLE, UsageMode::Overwrite, false),
        (PUBLISHER, UsageMode::CopyIfBlank, true),
    ]);

    let summary = h.pass(lookup.clone(), requested).run().await.unwrap();

    assert_eq!(summary.searched, 1);
    assert_eq!(summary.updated, 1);
    let writes = h.store.writes();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].force_list_rewrite);
    assert_eq!(
        writes[0].update.scalars.keys().copied().collect::<Vec<_>>(),
        vec![ScalarField::Publisher]
    );

    let (row, _, _) = h.store.get(id).unwrap();
    assert_eq!(row.scalars.get(&ScalarField::Title).unwrap(), "Mort");
    assert_eq!(row.scalars.get(&ScalarField::Publisher).unwrap(), "Corgi");
    assert!(!row.scalars.contains_key(&ScalarField::Pages));
}

#[tokio::test]
async fn book_with_nothing_blank_is_skipped() {
    let h = Harness::new();
    h.add("Mort", "0552131067", Some("Corgi")).await;

    let lookup = Arc::new(h.lookup());
    let requested = usages(&[(PUBLISHER, UsageMode::CopyIfBlank, true)]);

    let summary = h.pass(lookup.clone(), requested).run().await.unwrap();

    assert_eq!(summary.searched, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.looked_up, 0);
    assert!(lookup.searched_ids().is_empty());
    assert!(h.store.writes().is_empty());
    assert!(h.progress.statuses().contains(&"Skipping Mort".to_string()));
}

#[tokio::test]
async fn book_without_search_key_is_skipped() {
    let h = Harness::new();
    h.add("Anonymous pamphlet", "", None).await;

    let lookup = Arc::new(h.lookup());
    let requested = usages(&[(PUBLISHER, UsageMode::Overwrite, true)]);

    let summary = h.pass(lookup.clone(), requested).run().await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert!(lookup.searched_ids().is_empty());
}

#[tokio::test]
async fn overwrite_replaces_stored_values() {
    let h = Harness::new();
    let id = h.add("Mort", "0552131067", Some("Old House")).await;

    let lookup = Arc::new(h.lookup().reply(
        id,
        found(&[(ScalarField::Publisher, "Corgi"), (ScalarField::Pages, "272")]),
    ));
    let requested = usages(&[
        (PUBLISHER, UsageMode::Overwrite, true),
        (PAGES, UsageMode::CopyIfBlank, true),
    ]);

    h.pass(lookup, requested).run().await.unwrap();

    let (row, _, _) = h.store.get(id).unwrap();
    assert_eq!(row.scalars.get(&ScalarField::Publisher).unwrap(), "Corgi");
    assert_eq!(row.scalars.get(&ScalarField::Pages).unwrap(), "272");
}

#[tokio::test]
async fn not_found_posts_notice_and_continues() {
    let h = Harness::new();
    let missing = h.add("Unknown", "0000000000", None).await;
    let present = h.add("Mort", "0552131067", None).await;

    let lookup = Arc::new(
        h.lookup()
            .reply(present, found(&[(ScalarField::Publisher, "Corgi")])),
    );
    let requested = usages(&[(PUBLISHER, UsageMode::CopyIfBlank, true)]);

    let summary = h.pass(lookup.clone(), requested).run().await.unwrap();

    assert_eq!(lookup.searched_ids(), vec![missing, present]);
    assert_eq!(summary.not_found, 1);
    assert_eq!(summary.updated, 1);
    assert!(h.progress.notices().contains(&NOT_FOUND_NOTICE.to_string()));
    assert_eq!(h.store.writes()[0].row_id, present);
}

#[tokio::test]
async fn lookup_cancellation_stops_the_pass() {
    let h = Harness::new();
    let mut lookup = h.lookup();
    for n in 1..=10 {
        let id = h.add(&format!("Book {}", n), &format!("97800000000{:02}", n), None).await;
        let reply = if n == 5 {
            Reply::Cancel
        } else {
            found(&[(ScalarField::Publisher, "Corgi")])
        };
        lookup = lookup.reply(id, reply);
    }
    let lookup = Arc::new(lookup);
    let requested = usages(&[(PUBLISHER, UsageMode::Overwrite, true)]);

    let pass = h.pass(lookup.clone(), requested);
    let summary = pass.run().await.unwrap();

    assert!(summary.cancelled);
    assert!(pass.cancellation().is_cancelled());
    assert_eq!(summary.searched, 5);
    assert_eq!(summary.updated, 4);
    assert_eq!(lookup.searched_ids(), vec![1, 2, 3, 4, 5]);
    let written: Vec<i64> = h.store.writes().iter().map(|w| w.row_id).collect();
    assert_eq!(written, vec![1, 2, 3, 4]);
    assert_eq!(summary.message(), "Cancelled: 5 books searched");
    assert_eq!(
        h.progress.notices().last().unwrap(),
        "Cancelled: 5 books searched"
    );
}

#[tokio::test]
async fn external_cancellation_before_start() {
    let h = Harness::new();
    h.add("Mort", "0552131067", None).await;

    let lookup = Arc::new(h.lookup());
    let token = CancellationToken::new();
    token.cancel();
    let requested = usages(&[(PUBLISHER, UsageMode::Overwrite, true)]);

    let summary = h
        .pass(lookup.clone(), requested)
        .with_cancellation(token)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.searched, 0);
    assert!(summary.cancelled);
    assert!(lookup.searched_ids().is_empty());
}

#[tokio::test]
async fn data_arriving_after_cancellation_is_not_merged() {
    let h = Harness::new();
    let first = h.add("Mort", "0552131067", None).await;
    h.add("Eric", "0575046368", None).await;
    h.add("Sourcery", "0552131075", None).await;
    let cover = h.tmp.path().join("mort.jpg");
    fs::write(&cover, b"jpeg bytes").unwrap();

    let token = CancellationToken::new();
    let mut data = FetchedData::default();
    data.scalars.insert(ScalarField::Publisher, "Corgi".into());
    let lookup = Arc::new(
        h.lookup()
            .with_cover(cover)
            .reply(first, Reply::FoundAfterCancel(data, token.clone())),
    );
    let requested = usages(&[
        (PUBLISHER, UsageMode::Overwrite, true),
        (Field::Thumbnail, UsageMode::Overwrite, true),
    ]);

    let summary = h
        .pass(lookup.clone(), requested)
        .with_cancellation(token)
        .run()
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.searched, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.thumbnails_adopted, 0);
    assert_eq!(lookup.searched_ids(), vec![first]);
    assert!(h.store.writes().is_empty());
    assert!(!h.thumbnails.temp_path().exists());
    assert!(!h.thumbnails.path_for(first).exists());
    assert_eq!(summary.message(), "Cancelled: 1 books searched");
}

#[tokio::test]
async fn requested_thumbnail_is_adopted() {
    let h = Harness::new();
    let id = h.add("Mort", "0552131067", None).await;
    let cover = h.tmp.path().join("mort.jpg");
    fs::write(&cover, b"jpeg bytes").unwrap();

    let lookup = Arc::new(
        h.lookup()
            .with_cover(cover)
            .reply(id, found(&[(ScalarField::Publisher, "Corgi")])),
    );
    let requested = usages(&[(Field::Thumbnail, UsageMode::CopyIfBlank, true)]);

    let summary = h.pass(lookup.clone(), requested).run().await.unwrap();

    assert_eq!(summary.thumbnails_adopted, 1);
    assert!(lookup.queries.lock().unwrap()[0].1.want_thumbnail);
    assert_eq!(fs::read(h.thumbnails.path_for(id)).unwrap(), b"jpeg bytes");
    assert!(!h.thumbnails.temp_path().exists());
    // Publisher was fetched but never requested.
    assert!(h.store.writes().is_empty());
}

#[tokio::test]
async fn existing_thumbnail_is_not_replaced() {
    let h = Harness::new();
    let id = h.add("Mort", "0552131067", None).await;
    h.thumbnails.check_writable().unwrap();
    fs::write(h.thumbnails.path_for(id), b"mine").unwrap();

    let lookup = Arc::new(h.lookup());
    let requested = usages(&[(Field::Thumbnail, UsageMode::CopyIfBlank, true)]);

    let summary = h.pass(lookup.clone(), requested).run().await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(fs::read(h.thumbnails.path_for(id)).unwrap(), b"mine");
}

#[tokio::test]
async fn unwritable_thumbnail_dir_aborts_before_any_book() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("covers");
    fs::write(&blocker, b"not a directory").unwrap();

    let store = Arc::new(InMemoryRecordStore::new());
    let mut record = NewRecord::default();
    record.scalars.insert(ScalarField::Isbn, "0552131067".into());
    store.insert_record(&record).await.unwrap();

    let thumbnails = Arc::new(FsThumbnailStore::new(&blocker));
    let lookup = Arc::new(ScriptedLookup::new(thumbnails.temp_path()));
    let requested = usages(&[(PUBLISHER, UsageMode::Overwrite, true)]);

    let pass = RefreshPass::new(store.clone(), thumbnails, lookup.clone(), requested);
    let summary = pass.run().await.unwrap();

    assert!(summary.aborted.is_some());
    assert_eq!(summary.searched, 0);
    assert!(pass.cancellation().is_cancelled());
    assert!(summary.message().starts_with("Refresh aborted:"));
    assert!(lookup.searched_ids().is_empty());
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn dry_run_never_looks_up_or_writes() {
    let h = Harness::new();
    h.add("Mort", "0552131067", None).await;
    h.add("Eric", "0575046368", Some("Gollancz")).await;

    let lookup = Arc::new(h.lookup());
    let requested = usages(&[(PUBLISHER, UsageMode::CopyIfBlank, true)]);

    let summary = h
        .pass(lookup.clone(), requested)
        .with_options(RefreshOptions {
            dry_run: true,
            ..Default::default()
        })
        .run()
        .await
        .unwrap();

    assert_eq!(
        summary,
        RefreshSummary {
            searched: 2,
            looked_up: 1,
            skipped: 1,
            ..Default::default()
        }
    );
    assert!(lookup.searched_ids().is_empty());
    assert!(h.store.writes().is_empty());
}

#[tokio::test]
async fn only_and_limit_narrow_the_walk() {
    let h = Harness::new();
    for n in 1..=4 {
        h.add(&format!("Book {}", n), &format!("97800000000{:02}", n), None).await;
    }

    let lookup = Arc::new(h.lookup());
    let requested = usages(&[(PUBLISHER, UsageMode::Overwrite, true)]);

    let summary = h
        .pass(lookup.clone(), requested)
        .with_options(RefreshOptions {
            only: vec![2, 3, 4],
            limit: Some(2),
            dry_run: false,
        })
        .run()
        .await
        .unwrap();

    assert_eq!(summary.searched, 2);
    assert_eq!(lookup.searched_ids(), vec![2, 3]);
}

#[tokio::test]
async fn illegal_scalar_policy_does_not_block_other_fields() {
    let h = Harness::new();
    let mut record = NewRecord::default();
    record.scalars.insert(ScalarField::Title, "Good Omens".into());
    record.authors = vec![Author::new("Pratchett", "Terry")];
    let id = h.store.insert_record(&record).await.unwrap();

    let lookup = Arc::new(h.lookup().reply(
        id,
        Reply::Found(FetchedData {
            scalars: [(ScalarField::Title, "Good Omens!".to_string())].into(),
            authors: Some(vec![Author::new("Gaiman", "Neil")]),
            series: Some(vec![Series::new("Omens", Some("1"))]),
            thumbnail: None,
        }),
    ));
    let requested = usages(&[
        (TITLE, UsageMode::AddExtra, true),
        (Field::Authors, UsageMode::AddExtra, true),
    ]);

    let summary = h.pass(lookup, requested).run().await.unwrap();

    assert_eq!(summary.field_errors, 1);
    assert_eq!(summary.updated, 1);
    let (row, authors, series) = h.store.get(id).unwrap();
    assert_eq!(row.scalars.get(&ScalarField::Title).unwrap(), "Good Omens");
    assert_eq!(
        authors,
        vec![Author::new("Pratchett", "Terry"), Author::new("Gaiman", "Neil")]
    );
    assert!(series.is_empty());
}
