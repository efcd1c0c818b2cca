//! Whole-file JSON persistence for the catalog.
//!
//! The catalog is a single pretty-printed array of [`BookRecord`]s. Every
//! write replaces the file through a temporary file in the same directory
//! and a rename, so readers only ever see a complete document.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Result, ShelfError};
use crate::models::BookRecord;

/// Reads and validates the catalog. Nothing is written on failure.
pub fn load(path: &Path) -> Result<Vec<BookRecord>> {
  let raw = fs::read_to_string(path)?;
  let records: Vec<BookRecord> = serde_json::from_str(&raw)?;
  validate(&records)?;
  log::debug!("loaded {} catalog entries from {}", records.len(), path.display());
  Ok(records)
}

/// Like [`load`], but a catalog that does not exist yet is empty.
pub fn load_or_empty(path: &Path) -> Result<Vec<BookRecord>> {
  if !path.exists() {
    log::info!("catalog {} does not exist yet, starting empty", path.display());
    return Ok(Vec::new());
  }
  load(path)
}

/// Every entry needs a non-blank id, unique across the catalog. Ids are
/// compared exactly as written.
pub fn validate(records: &[BookRecord]) -> Result<()> {
  let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
  for (index, record) in records.iter().enumerate() {
    let id = record.id.as_str();
    if id.trim().is_empty() {
      return Err(ShelfError::InvalidCatalog(format!(
        "entry {} ({}) has no id",
        index,
        record.label()
      )));
    }
    if !seen.insert(id) {
      return Err(ShelfError::InvalidCatalog(format!(
        "id {} appears more than once",
        id
      )));
    }
  }
  Ok(())
}

pub fn save(path: &Path, records: &[BookRecord]) -> Result<()> {
  validate(records)?;
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  };
  let mut file = NamedTempFile::new_in(&dir)?;
  serde_json::to_writer_pretty(&mut file, records)?;
  file.write_all(b"\n")?;
  file.as_file().sync_all()?;
  file.persist(path).map_err(|err| ShelfError::Io(err.error))?;
  log::info!("wrote {} catalog entries to {}", records.len(), path.display());
  Ok(())
}

/// Periodic full writes during long batch passes, so an interrupted run
/// loses at most `every` items of work.
pub struct Checkpoint {
  path: PathBuf,
  every: usize,
  pending: usize,
}

impl Checkpoint {
  pub fn new(path: &Path, every: usize) -> Self {
    Checkpoint {
      path: path.to_path_buf(),
      every,
      pending: 0,
    }
  }

  /// Records one changed item and writes when `every` changes have piled up.
  /// Returns whether a write happened. `every == 0` disables checkpoints.
  pub fn record_change(&mut self, records: &[BookRecord]) -> Result<bool> {
    self.pending += 1;
    if self.every == 0 || self.pending < self.every {
      return Ok(false);
    }
    log::info!("checkpoint after {} changes", self.pending);
    save(&self.path, records)?;
    self.pending = 0;
    Ok(true)
  }

  /// Writes any changes not yet covered by a checkpoint.
  pub fn finish(&mut self, records: &[BookRecord]) -> Result<bool> {
    if self.pending == 0 {
      return Ok(false);
    }
    save(&self.path, records)?;
    self.pending = 0;
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::{load, load_or_empty, save, Checkpoint};
  use crate::error::ShelfError;
  use crate::models::BookRecord;
  use std::fs;

  fn record(id: &str, title: &str) -> BookRecord {
    let mut record = BookRecord::new(id);
    record.title = Some(title.to_string());
    record
  }

  #[test]
  fn save_then_load_keeps_order_and_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    let mut dune = record("b", "Dune");
    dune.categories = Some(vec!["Fiction".to_string(), "Classics".to_string()]);
    save(&path, &[dune.clone(), record("a", "Emma")]).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\n  {\n"), "expected pretty output: {}", raw);

    let loaded = load(&path).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], dune);
    assert_eq!(loaded[1].id, "a");
  }

  #[test]
  fn rejects_duplicate_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    fs::write(&path, r#"[{"id":"x","title":"A"},{"id":"x","title":"B"}]"#).unwrap();
    let err = load(&path).unwrap_err();
    assert!(matches!(err, ShelfError::InvalidCatalog(_)), "{}", err);
  }

  #[test]
  fn rejects_missing_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    fs::write(&path, r#"[{"title":"No id here"}]"#).unwrap();
    let err = load(&path).unwrap_err();
    assert!(err.to_string().contains("has no id"), "{}", err);
  }

  #[test]
  fn ids_are_compared_as_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    fs::write(&path, r#"[{"id":"a","title":"A"},{"id":" a","title":"B"}]"#).unwrap();
    let loaded = load(&path).unwrap();
    assert_eq!(loaded[1].id, " a");

    fs::write(&path, r#"[{"id":"  ","title":"Blank"}]"#).unwrap();
    assert!(matches!(load(&path).unwrap_err(), ShelfError::InvalidCatalog(_)));
  }

  #[test]
  fn malformed_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    fs::write(&path, "[{\"id\": \"a\"").unwrap();
    assert!(matches!(load(&path).unwrap_err(), ShelfError::Json(_)));
  }

  #[test]
  fn invalid_records_are_never_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    save(&path, &[record("a", "Emma")]).unwrap();
    assert!(save(&path, &[record("a", "Emma"), record("a", "Dune")]).is_err());
    assert_eq!(load(&path).unwrap().len(), 1);
  }

  #[test]
  fn missing_catalog_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_or_empty(&dir.path().join("none.json")).unwrap().is_empty());
  }

  #[test]
  fn checkpoint_writes_every_n_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");
    let records = vec![record("a", "Emma")];
    let mut checkpoint = Checkpoint::new(&path, 2);

    assert!(!checkpoint.record_change(&records).unwrap());
    assert!(!path.exists());
    assert!(checkpoint.record_change(&records).unwrap());
    assert!(path.exists());
    assert!(!checkpoint.finish(&records).unwrap());
    assert!(!checkpoint.record_change(&records).unwrap());
    assert!(checkpoint.finish(&records).unwrap());
  }
}
