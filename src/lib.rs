//! Personal ebook catalog kept in step with a Google Drive folder.
//!
//! The catalog is a JSON array of [`BookRecord`]s keyed by remote file id.
//! The commands in [`tasks`] dedupe it, reconcile it against the folder,
//! import new files and enrich records from Google Books.

pub mod catalog;
pub mod config;
pub mod dedup;
pub mod drive;
pub mod enrich;
pub mod error;
pub mod http;
pub mod models;
pub mod reconcile;
pub mod tasks;

pub use config::Config;
pub use dedup::{canonical_key, deduplicate, parse_file_name, score, CanonicalKey, MAX_SCORE};
pub use drive::{DriveClient, RemoteStore};
pub use enrich::{BookMetadata, GoogleBooksClient, MergeMode, MetadataSource};
pub use error::{Result, ShelfError};
pub use models::{BookRecord, OperationStats, RemoteFile, Saga};
pub use reconcile::{diff_ids, find_orphans, IdDiff};
