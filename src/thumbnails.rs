//! Cover image storage.
//!
//! Thumbnails live outside the record store, one file per book. Lookups
//! download into a single temporary file which is later either moved into
//! place for a book or deleted.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const TEMP_NAME: &str = "tmp.jpg";
const PROBE_NAME: &str = ".write-probe";

/// What [`ThumbnailStore::probe`] found for a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailProbe {
    pub exists: bool,
    pub len: u64,
}

impl ThumbnailProbe {
    pub const MISSING: ThumbnailProbe = ThumbnailProbe {
        exists: false,
        len: 0,
    };

    /// A missing or zero-length file counts as no thumbnail.
    pub fn is_blank(&self) -> bool {
        !self.exists || self.len == 0
    }
}

/// File operations on stored thumbnails.
pub trait ThumbnailStore: Send + Sync {
    /// Inspect the stored thumbnail for a book.
    fn probe(&self, row_id: i64) -> ThumbnailProbe;

    /// Where lookups should write a downloaded cover.
    fn temp_path(&self) -> PathBuf;

    /// Move a downloaded file into place as the thumbnail for `row_id`.
    fn adopt(&self, temp: &Path, row_id: i64) -> Result<()>;

    /// Delete a downloaded file that is not wanted.
    fn discard(&self, path: &Path) -> Result<()>;

    /// Remove a leftover temporary download, if any.
    fn discard_temp(&self) {
        if let Err(e) = self.discard(&self.temp_path()) {
            tracing::debug!("Failed to remove temporary thumbnail: {:#}", e);
        }
    }

    /// Fail if thumbnails cannot be written.
    fn check_writable(&self) -> Result<()>;
}

/// Thumbnails stored as `<dir>/<row_id>.jpg`.
pub struct FsThumbnailStore {
    dir: PathBuf,
}

impl FsThumbnailStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, row_id: i64) -> PathBuf {
        self.dir.join(format!("{}.jpg", row_id))
    }
}

impl ThumbnailStore for FsThumbnailStore {
    fn probe(&self, row_id: i64) -> ThumbnailProbe {
        match fs::metadata(self.path_for(row_id)) {
            Ok(meta) => ThumbnailProbe {
                exists: true,
                len: meta.len(),
            },
            Err(_) => ThumbnailProbe::MISSING,
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(TEMP_NAME)
    }

    fn adopt(&self, temp: &Path, row_id: i64) -> Result<()> {
        let dest = self.path_for(row_id);
        fs::rename(temp, &dest).with_context(|| {
            format!(
                "Failed to move thumbnail {} to {}",
                temp.display(),
                dest.display()
            )
        })
    }

    fn discard(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    fn check_writable(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Cannot create thumbnail directory {}", self.dir.display())
        })?;
        let probe = self.dir.join(PROBE_NAME);
        let mut file = fs::File::create(&probe)
            .with_context(|| format!("Thumbnail directory {} is not writable", self.dir.display()))?;
        file.write_all(b"ok")?;
        drop(file);
        fs::remove_file(&probe)?;
        Ok(())
    }
}
