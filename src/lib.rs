//! # Shelf Sync
//!
//! Refreshes a local book catalogue from an external lookup service.
//!
//! A refresh pass walks every book in the catalogue. For each one it decides
//! which fields actually need fetching (per-field usage policies plus the
//! record's current blanks), asks the lookup service, then merges the result
//! back under those same policies. Only one lookup is ever in flight, and the
//! pass can be cancelled between books or by the lookup itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │  SQLite  │──▶│  select  │──▶│ coordinator │──▶│  lookup  │
//! │ catalogue│   │ policies │   │ single-shot │   │ service  │
//! └────▲─────┘   └──────────┘   └──────┬──────┘   └──────────┘
//!      │                               ▼
//!      │         ┌──────────┐   ┌─────────────┐
//!      └─────────│  merge   │◀──│ completion  │
//!                └──────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shelf init                          # create database
//! shelf import books.json             # seed the catalogue
//! shelf fields                        # show field policies
//! shelf refresh --fields title,authors
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Fields, records, fetched data |
//! | [`policy`] | Per-field usage policies |
//! | [`select`] | Per-record field selection |
//! | [`merge`] | Policy-driven merge of fetched data |
//! | [`coordinator`] | Single-flight lookup dispatch |
//! | [`lookup`] | Lookup service abstraction and fixture provider |
//! | [`refresh`] | The refresh pass |
//! | [`store`] | Record store trait, SQLite and in-memory backends |
//! | [`thumbnails`] | Cover image storage |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod config;
pub mod coordinator;
pub mod db;
pub mod fields;
pub mod import;
pub mod lookup;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod policy;
pub mod progress;
pub mod refresh;
pub mod select;
pub mod store;
pub mod thumbnails;
