use std::collections::BTreeSet;

use crate::models::{BookRecord, RemoteFile};

/// Identifiers present on only one side. Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdDiff {
  pub only_in_a: Vec<String>,
  pub only_in_b: Vec<String>,
}

impl IdDiff {
  pub fn is_empty(&self) -> bool {
    self.only_in_a.is_empty() && self.only_in_b.is_empty()
  }
}

/// Exact-match set differences `a - b` and `b - a`.
pub fn diff_ids<'a, A, B>(a: A, b: B) -> IdDiff
where
  A: IntoIterator<Item = &'a str>,
  B: IntoIterator<Item = &'a str>,
{
  let left: BTreeSet<&str> = a.into_iter().collect();
  let right: BTreeSet<&str> = b.into_iter().collect();
  IdDiff {
    only_in_a: left.difference(&right).map(|id| id.to_string()).collect(),
    only_in_b: right.difference(&left).map(|id| id.to_string()).collect(),
  }
}

/// Catalog entries without a backing file and files without a catalog entry,
/// each in its input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Orphans {
  pub records: Vec<BookRecord>,
  pub files: Vec<RemoteFile>,
}

pub fn find_orphans(records: &[BookRecord], files: &[RemoteFile]) -> Orphans {
  let diff = diff_ids(
    records.iter().map(|record| record.id.as_str()),
    files.iter().map(|file| file.id.as_str()),
  );
  let orphan_records: BTreeSet<&str> = diff.only_in_a.iter().map(String::as_str).collect();
  let orphan_files: BTreeSet<&str> = diff.only_in_b.iter().map(String::as_str).collect();

  Orphans {
    records: records
      .iter()
      .filter(|record| orphan_records.contains(record.id.as_str()))
      .cloned()
      .collect(),
    files: files
      .iter()
      .filter(|file| orphan_files.contains(file.id.as_str()))
      .cloned()
      .collect(),
  }
}
