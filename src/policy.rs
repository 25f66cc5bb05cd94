//! Per-field merge policies.
//!
//! A [`FieldUsage`] says whether a field takes part in a refresh and how a
//! looked-up value is combined with the stored one. A [`FieldUsages`] set
//! holds at most one policy per field.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::models::Field;

/// How a fetched value is combined with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMode {
    /// Replace the stored value whenever the lookup returns one.
    Overwrite,
    /// Only fill in the value when the stored one is blank.
    CopyIfBlank,
    /// Append fetched entries after the stored ones. List fields only.
    AddExtra,
}

impl UsageMode {
    pub fn label(self) -> &'static str {
        match self {
            UsageMode::Overwrite => "overwrite",
            UsageMode::CopyIfBlank => "copy_if_blank",
            UsageMode::AddExtra => "add_extra",
        }
    }
}

/// Policy for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldUsage {
    pub field: Field,
    pub mode: UsageMode,
    pub selected: bool,
}

impl FieldUsage {
    pub fn new(field: Field, mode: UsageMode, selected: bool) -> Self {
        Self {
            field,
            mode,
            selected,
        }
    }
}

/// A set of policies keyed by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUsages {
    usages: BTreeMap<Field, FieldUsage>,
}

impl FieldUsages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a policy, replacing any existing one for the same field.
    pub fn put(&mut self, usage: FieldUsage) {
        self.usages.insert(usage.field, usage);
    }

    pub fn get(&self, field: Field) -> Option<&FieldUsage> {
        self.usages.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.usages.contains_key(&field)
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldUsage> {
        self.usages.values()
    }

    pub fn len(&self) -> usize {
        self.usages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    /// Whether this set asks for a cover image.
    pub fn wants_thumbnail(&self) -> bool {
        self.contains(Field::Thumbnail)
    }

    /// Keep `selected` only for the named fields; everything else is deselected.
    pub fn restrict_to(&mut self, fields: &[Field]) {
        for usage in self.usages.values_mut() {
            usage.selected = usage.selected && fields.contains(&usage.field);
        }
    }
}

impl FromIterator<FieldUsage> for FieldUsages {
    fn from_iter<I: IntoIterator<Item = FieldUsage>>(iter: I) -> Self {
        let mut set = FieldUsages::new();
        for usage in iter {
            set.put(usage);
        }
        set
    }
}
