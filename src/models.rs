//! Core data models used throughout shelf-sync.
//!
//! These types describe the book records that flow through a refresh pass:
//! the snapshot taken before a lookup, the data a lookup returns, and the
//! update written back to the store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Scalar (single string valued) book columns that a lookup can refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    Title,
    Isbn,
    Publisher,
    DatePublished,
    Pages,
    ListPrice,
    Format,
    Genre,
    Language,
    Description,
}

impl ScalarField {
    pub const ALL: [ScalarField; 10] = [
        ScalarField::Title,
        ScalarField::Isbn,
        ScalarField::Publisher,
        ScalarField::DatePublished,
        ScalarField::Pages,
        ScalarField::ListPrice,
        ScalarField::Format,
        ScalarField::Genre,
        ScalarField::Language,
        ScalarField::Description,
    ];

    /// Field name as used in configuration and in the `books` table.
    pub fn name(self) -> &'static str {
        match self {
            ScalarField::Title => "title",
            ScalarField::Isbn => "isbn",
            ScalarField::Publisher => "publisher",
            ScalarField::DatePublished => "date_published",
            ScalarField::Pages => "pages",
            ScalarField::ListPrice => "list_price",
            ScalarField::Format => "format",
            ScalarField::Genre => "genre",
            ScalarField::Language => "language",
            ScalarField::Description => "description",
        }
    }
}

/// A refreshable field of a book record.
///
/// Resolved once from its configured name so the selector and merger can
/// match on the kind of field instead of comparing names per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Scalar(ScalarField),
    Authors,
    Series,
    Thumbnail,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Scalar(s) => s.name(),
            Field::Authors => "authors",
            Field::Series => "series",
            Field::Thumbnail => "thumbnail",
        }
    }

    /// Every known field, scalars first.
    pub fn all() -> Vec<Field> {
        let mut fields: Vec<Field> = ScalarField::ALL.iter().map(|s| Field::Scalar(*s)).collect();
        fields.extend([Field::Authors, Field::Series, Field::Thumbnail]);
        fields
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown field '{0}'")]
pub struct ParseFieldError(pub String);

impl FromStr for Field {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authors" => Ok(Field::Authors),
            "series" => Ok(Field::Series),
            "thumbnail" => Ok(Field::Thumbnail),
            other => ScalarField::ALL
                .iter()
                .find(|f| f.name() == other)
                .map(|f| Field::Scalar(*f))
                .ok_or_else(|| ParseFieldError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub family_name: String,
    #[serde(default)]
    pub given_names: String,
}

impl Author {
    pub fn new(family_name: &str, given_names: &str) -> Self {
        Self {
            family_name: family_name.to_string(),
            given_names: given_names.to_string(),
        }
    }

    /// "Given Family", or just the family name when no given names are known.
    pub fn display_name(&self) -> String {
        if self.given_names.is_empty() {
            self.family_name.clone()
        } else {
            format!("{} {}", self.given_names, self.family_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub number: Option<String>,
}

impl Series {
    pub fn new(name: &str, number: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            number: number.map(str::to_string),
        }
    }
}

/// One row from the record store, before its author and series lists are read.
#[derive(Debug, Clone)]
pub struct BookRow {
    pub row_id: i64,
    /// Scalar columns; a missing key means the column is NULL.
    pub scalars: BTreeMap<ScalarField, String>,
}

/// Values captured for one record before a lookup is started.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSnapshot {
    pub row_id: i64,
    pub scalars: BTreeMap<ScalarField, String>,
    pub authors: Vec<Author>,
    pub series: Vec<Series>,
}

impl RecordSnapshot {
    pub fn from_row(row: BookRow, authors: Vec<Author>, series: Vec<Series>) -> Self {
        Self {
            row_id: row.row_id,
            scalars: row.scalars,
            authors,
            series,
        }
    }

    /// Scalar value, or `""` when absent.
    pub fn scalar(&self, field: ScalarField) -> &str {
        self.scalars.get(&field).map(String::as_str).unwrap_or("")
    }

    /// Formatted name of the first author, used as the lookup author key.
    pub fn author_formatted(&self) -> String {
        self.authors
            .first()
            .map(Author::display_name)
            .unwrap_or_default()
    }
}

/// Result of a successful lookup for one record. Any part may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedData {
    pub scalars: BTreeMap<ScalarField, String>,
    pub authors: Option<Vec<Author>>,
    pub series: Option<Vec<Series>>,
    /// Temporary file holding a downloaded cover image.
    pub thumbnail: Option<PathBuf>,
}

impl FetchedData {
    /// Whether the lookup returned anything for `field`.
    pub fn contains(&self, field: Field) -> bool {
        match field {
            Field::Scalar(s) => self.scalars.contains_key(&s),
            Field::Authors => self.authors.is_some(),
            Field::Series => self.series.is_some(),
            Field::Thumbnail => self.thumbnail.is_some(),
        }
    }
}

/// Values to write back to one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    pub scalars: BTreeMap<ScalarField, String>,
    pub authors: Option<Vec<Author>>,
    pub series: Option<Vec<Series>>,
}

impl UpdateSet {
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.authors.is_none() && self.series.is_none()
    }

    pub fn contains(&self, field: Field) -> bool {
        match field {
            Field::Scalar(s) => self.scalars.contains_key(&s),
            Field::Authors => self.authors.is_some(),
            Field::Series => self.series.is_some(),
            Field::Thumbnail => false,
        }
    }
}

/// A book to insert, as read from an import file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecord {
    #[serde(flatten)]
    pub scalars: BTreeMap<ScalarField, String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub series: Vec<Series>,
}
