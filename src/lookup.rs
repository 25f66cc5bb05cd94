//! Lookup service abstraction.
//!
//! A [`LookupService`] answers one [`SearchQuery`] at a time and reports the
//! result through the [`CompletionHandle`] it is given. It may complete on any
//! thread or task, and owns its own retry policy; "nothing found" and "failed"
//! are both reported as no data.
//!
//! The bundled [`FixtureLookup`] answers from a JSON file. It completes on a
//! spawned tokio task, like a network-backed service would.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::LookupConfig;
use crate::coordinator::CompletionHandle;
use crate::models::{Author, FetchedData, RecordSnapshot, ScalarField, Series};

/// What to look up for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub author: String,
    pub title: String,
    pub isbn: String,
    pub want_thumbnail: bool,
}

impl SearchQuery {
    /// Build a query from a snapshot, or `None` when the record has neither an
    /// ISBN nor both an author and a title.
    pub fn for_snapshot(snapshot: &RecordSnapshot, want_thumbnail: bool) -> Option<Self> {
        let isbn = snapshot.scalar(ScalarField::Isbn).to_string();
        let title = snapshot.scalar(ScalarField::Title).to_string();
        let author = snapshot.author_formatted();
        if isbn.is_empty() && (author.is_empty() || title.is_empty()) {
            return None;
        }
        Some(Self {
            author,
            title,
            isbn,
            want_thumbnail,
        })
    }

    /// Text shown in progress output: the title, or the ISBN when untitled.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.isbn
        } else {
            &self.title
        }
    }
}

/// An asynchronous book lookup.
pub trait LookupService: Send + Sync {
    /// Start a lookup. Must eventually complete or drop `completion`.
    fn search(&self, query: SearchQuery, completion: CompletionHandle);
}

/// One book in a fixture file.
#[derive(Debug, Clone, Deserialize)]
struct FixtureEntry {
    #[serde(flatten)]
    scalars: BTreeMap<ScalarField, String>,
    #[serde(default)]
    authors: Option<Vec<Author>>,
    #[serde(default)]
    series: Option<Vec<Series>>,
    /// Cover image, relative to the fixture file.
    #[serde(default)]
    thumbnail: Option<PathBuf>,
}

/// Lookup service backed by a JSON array of books.
///
/// Matches on ISBN (ignoring hyphens and spaces) when the query has one,
/// otherwise on title and first author, case-insensitively.
pub struct FixtureLookup {
    entries: Arc<Vec<FixtureEntry>>,
    base_dir: PathBuf,
    download_to: PathBuf,
}

impl FixtureLookup {
    /// Load fixtures from `path`. Fetched covers are copied to `download_to`.
    pub fn load(path: &Path, download_to: PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lookup fixtures: {}", path.display()))?;
        let entries: Vec<FixtureEntry> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse lookup fixtures: {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self {
            entries: Arc::new(entries),
            base_dir,
            download_to,
        })
    }

    fn find(&self, query: &SearchQuery) -> Option<FixtureEntry> {
        let isbn = normalize_isbn(&query.isbn);
        if !isbn.is_empty() {
            return self
                .entries
                .iter()
                .find(|e| {
                    e.scalars
                        .get(&ScalarField::Isbn)
                        .is_some_and(|v| normalize_isbn(v) == isbn)
                })
                .cloned();
        }
        self.entries
            .iter()
            .find(|e| {
                let title_matches = e
                    .scalars
                    .get(&ScalarField::Title)
                    .is_some_and(|t| t.eq_ignore_ascii_case(&query.title));
                let author_matches = e.authors.as_ref().is_some_and(|authors| {
                    authors
                        .iter()
                        .any(|a| a.display_name().eq_ignore_ascii_case(&query.author))
                });
                title_matches && author_matches
            })
            .cloned()
    }
}

fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase()
}

impl LookupService for FixtureLookup {
    fn search(&self, query: SearchQuery, completion: CompletionHandle) {
        let entry = self.find(&query);
        let cover = entry
            .as_ref()
            .and_then(|e| e.thumbnail.as_ref())
            .filter(|_| query.want_thumbnail)
            .map(|p| self.base_dir.join(p));
        let download_to = self.download_to.clone();

        tokio::spawn(async move {
            let Some(entry) = entry else {
                tracing::debug!(isbn = %query.isbn, title = %query.title, "no fixture match");
                completion.complete(None, false);
                return;
            };

            let mut data = FetchedData {
                scalars: entry.scalars,
                authors: entry.authors,
                series: entry.series,
                thumbnail: None,
            };
            if let Some(src) = cover {
                match tokio::fs::copy(&src, &download_to).await {
                    Ok(_) => data.thumbnail = Some(download_to),
                    Err(e) => tracing::warn!("Failed to fetch cover {}: {}", src.display(), e),
                }
            }
            completion.complete(Some(data), false);
        });
    }
}

/// Build the lookup service named in the configuration.
pub fn create_lookup(config: &LookupConfig, download_to: PathBuf) -> Result<Arc<dyn LookupService>> {
    match config.provider.as_str() {
        "fixture" => {
            let path = config
                .fixture_path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("lookup.fixture_path required for fixture provider"))?;
            Ok(Arc::new(FixtureLookup::load(path, download_to)?))
        }
        "disabled" => bail!("Lookup provider is disabled; set [lookup].provider to refresh records"),
        other => bail!("Unknown lookup provider: {}", other),
    }
}
