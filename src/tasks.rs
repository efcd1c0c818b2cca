//! One function per command. Each loads what it needs, computes the next
//! catalog in full, and writes it once at the end. A failed load or listing
//! returns before anything is written; failures on single remote items are
//! logged, counted and skipped.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::catalog::{self, Checkpoint};
use crate::dedup::{self, parse_file_name};
use crate::drive::RemoteStore;
use crate::enrich::{self, MergeMode, MetadataSource};
use crate::error::Result;
use crate::models::{BookRecord, OperationStats, RemoteFile};
use crate::reconcile;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeReport {
  pub before: usize,
  pub after: usize,
  /// Ids of the catalog entries (or remote files) that were dropped, or
  /// would be on a dry run. Failed remote deletions are not listed.
  pub removed_ids: Vec<String>,
  /// Remote deletions; all zero for catalog-only runs.
  pub deletions: OperationStats,
  pub written: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
  pub prune_catalog: bool,
  pub delete_files: bool,
  pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
  pub orphan_records: Vec<BookRecord>,
  pub orphan_files: Vec<RemoteFile>,
  pub pruned: usize,
  pub deletions: OperationStats,
  pub written: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
  pub added: Vec<BookRecord>,
  pub written: bool,
}

#[derive(Debug, Clone)]
pub struct EnrichOptions {
  pub mode: MergeMode,
  pub limit: Option<usize>,
  pub delay: Duration,
  pub checkpoint_every: usize,
}

/// Collapses catalog entries that describe the same book.
pub fn dedupe_catalog(catalog_path: &Path, dry_run: bool) -> Result<DedupeReport> {
  let records = catalog::load(catalog_path)?;
  let before = records.len();
  let result = dedup::deduplicate(records);

  for record in &result.removed {
    log::info!(
      "duplicate {} [{}] {}",
      record.id,
      record.canonical_key(),
      record.label()
    );
  }

  let mut report = DedupeReport {
    before,
    after: result.survivors.len(),
    removed_ids: result.removed.iter().map(|record| record.id.clone()).collect(),
    ..Default::default()
  };
  if !dry_run && result.removed_count() > 0 {
    catalog::save(catalog_path, &result.survivors)?;
    report.written = true;
  }
  Ok(report)
}

/// Collapses remote files whose names describe the same book. Each file is
/// scored by its catalog entry (0 without one). Losing files are deleted and
/// their catalog entries dropped; a file whose deletion fails keeps its entry.
pub fn dedupe_remote(
  catalog_path: &Path,
  store: &dyn RemoteStore,
  dry_run: bool,
) -> Result<DedupeReport> {
  let records = catalog::load_or_empty(catalog_path)?;
  let files = store.list_files()?;
  let before = files.len();

  let scores: HashMap<String, usize> = records
    .iter()
    .map(|record| (record.id.clone(), dedup::score(record)))
    .collect();
  let result = dedup::deduplicate_by(
    files,
    |file| parse_file_name(&file.name).canonical_key(),
    |file| scores.get(&file.id).copied().unwrap_or(0),
  );

  let mut report = DedupeReport {
    before,
    ..Default::default()
  };
  let deleted = delete_files(store, &result.removed, dry_run, &mut report.deletions);

  if dry_run {
    report.after = result.survivors.len();
    report.removed_ids = result.removed.iter().map(|file| file.id.clone()).collect();
    return Ok(report);
  }
  report.after = before - deleted.len();
  report.removed_ids = result
    .removed
    .iter()
    .filter(|file| deleted.contains(&file.id))
    .map(|file| file.id.clone())
    .collect();
  let next: Vec<BookRecord> = records
    .iter()
    .filter(|record| !deleted.contains(&record.id))
    .cloned()
    .collect();
  if next.len() != records.len() {
    catalog::save(catalog_path, &next)?;
    report.written = true;
  }
  Ok(report)
}

/// Reports catalog entries without files and files without entries, and
/// optionally repairs either side.
pub fn reconcile(
  catalog_path: &Path,
  store: &dyn RemoteStore,
  options: ReconcileOptions,
) -> Result<ReconcileReport> {
  let records = catalog::load(catalog_path)?;
  let files = store.list_files()?;
  let orphans = reconcile::find_orphans(&records, &files);

  for record in &orphans.records {
    log::info!("catalog entry without file: {} {}", record.id, record.label());
  }
  for file in &orphans.files {
    log::info!("file without catalog entry: {} {}", file.id, file.name);
  }

  let mut report = ReconcileReport::default();
  if options.delete_files {
    delete_files(store, &orphans.files, options.dry_run, &mut report.deletions);
  }

  if options.prune_catalog && !orphans.records.is_empty() {
    let orphan_ids: HashSet<&str> = orphans.records.iter().map(|record| record.id.as_str()).collect();
    let next: Vec<BookRecord> = records
      .iter()
      .filter(|record| !orphan_ids.contains(record.id.as_str()))
      .cloned()
      .collect();
    report.pruned = records.len() - next.len();
    if !options.dry_run {
      catalog::save(catalog_path, &next)?;
      report.written = true;
    }
  }

  report.orphan_records = orphans.records;
  report.orphan_files = orphans.files;
  Ok(report)
}

/// Adds a catalog entry, built from the parsed file name, for every remote
/// file that has none.
pub fn import(catalog_path: &Path, store: &dyn RemoteStore, dry_run: bool) -> Result<ImportReport> {
  let records = catalog::load_or_empty(catalog_path)?;
  let files = store.list_files()?;
  let orphans = reconcile::find_orphans(&records, &files);

  let added: Vec<BookRecord> = orphans.files.iter().map(record_from_file).collect();
  for record in &added {
    log::info!("new catalog entry {} {}", record.id, record.label());
  }

  let mut report = ImportReport {
    added,
    written: false,
  };
  if !dry_run && !report.added.is_empty() {
    let next: Vec<BookRecord> = records.into_iter().chain(report.added.iter().cloned()).collect();
    catalog::save(catalog_path, &next)?;
    report.written = true;
  }
  Ok(report)
}

fn record_from_file(file: &RemoteFile) -> BookRecord {
  let parsed = parse_file_name(&file.name);
  let mut record = BookRecord::new(file.id.clone());
  record.title = Some(parsed.title).filter(|title| !title.is_empty());
  record.author = parsed.author;
  record.saga = parsed.saga;
  record
}

/// Looks up metadata for every record that needs it, one request at a time
/// with `options.delay` between requests. Lookup failures skip the record.
pub fn enrich(
  catalog_path: &Path,
  source: &dyn MetadataSource,
  options: &EnrichOptions,
) -> Result<OperationStats> {
  let mut records = catalog::load(catalog_path)?;
  let mut targets: Vec<usize> = records
    .iter()
    .enumerate()
    .filter(|(_, record)| enrich::needs_enrichment(record, options.mode))
    .map(|(index, _)| index)
    .collect();
  if let Some(limit) = options.limit {
    targets.truncate(limit);
  }

  let total = targets.len();
  let mut stats = OperationStats {
    total,
    ..Default::default()
  };
  let mut checkpoint = Checkpoint::new(catalog_path, options.checkpoint_every);
  log::info!("Starting enrichment for {} of {} records", total, records.len());

  for (position, index) in targets.into_iter().enumerate() {
    if position > 0 && !options.delay.is_zero() {
      thread::sleep(options.delay);
    }
    let label = records[index].label();
    let title = records[index].title.clone().unwrap_or_default();
    let author = records[index].author.clone();

    match source.lookup(&title, author.as_deref()) {
      Ok(Some(metadata)) => {
        let changed = enrich::merge_metadata(&mut records[index], &metadata, options.mode);
        if changed > 0 {
          stats.processed += 1;
          log::info!("[{}/{}] {}: {} field(s) updated", position + 1, total, label, changed);
          checkpoint.record_change(&records)?;
        } else {
          stats.skipped += 1;
          log::info!("[{}/{}] {}: nothing new", position + 1, total, label);
        }
      }
      Ok(None) => {
        stats.skipped += 1;
        log::info!("[{}/{}] {}: no match found", position + 1, total, label);
      }
      Err(err) => {
        stats.errors += 1;
        log::warn!("[{}/{}] {}: lookup failed: {}", position + 1, total, label, err);
      }
    }
  }

  checkpoint.finish(&records)?;
  log::info!("Enrichment complete: {:?}", stats);
  Ok(stats)
}

/// Deletes `files` one by one and returns the ids that are gone. Failures
/// are logged and counted; the loop always runs to the end.
fn delete_files(
  store: &dyn RemoteStore,
  files: &[RemoteFile],
  dry_run: bool,
  stats: &mut OperationStats,
) -> HashSet<String> {
  let mut deleted = HashSet::new();
  stats.total += files.len();
  for file in files {
    if dry_run {
      log::info!("would delete {} {}", file.id, file.name);
      stats.skipped += 1;
      continue;
    }
    match store.delete_file(&file.id) {
      Ok(()) => {
        stats.processed += 1;
        deleted.insert(file.id.clone());
      }
      Err(err) => {
        stats.errors += 1;
        log::warn!("failed to delete {} {}: {}", file.id, file.name, err);
      }
    }
  }
  deleted
}
