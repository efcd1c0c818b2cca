use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dedup::{self, CanonicalKey};

/// Series membership of a book.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Saga {
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub number: Option<i64>,
}

/// One catalog entry. Keys are camelCase on disk; keys this struct does not
/// know about are kept in `extra` so a rewrite never drops them.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
  #[serde(default)]
  pub id: String, // remote file id
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub saga: Option<Saga>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cover_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub publisher: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub published_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub page_count: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub categories: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub average_rating: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ratings_count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub preview_link: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl BookRecord {
  pub fn new(id: impl Into<String>) -> Self {
    BookRecord {
      id: id.into(),
      ..Default::default()
    }
  }

  pub fn canonical_key(&self) -> CanonicalKey {
    let saga = self.saga.as_ref();
    dedup::canonical_key(
      self.title.as_deref(),
      self.author.as_deref(),
      saga.map(|value| value.name.as_str()),
      saga.and_then(|value| value.number),
    )
  }

  pub fn has_cover(&self) -> bool {
    self
      .cover_url
      .as_deref()
      .map(|value| !value.trim().is_empty())
      .unwrap_or(false)
  }

  /// Title and author for logs and console output.
  pub fn label(&self) -> String {
    let title = self.title.as_deref().unwrap_or("Untitled");
    match self.author.as_deref().filter(|value| !value.trim().is_empty()) {
      Some(author) => format!("{} ({})", title, author),
      None => title.to_string(),
    }
  }
}

/// One object in the cloud folder.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mime_type: Option<String>,
}

impl RemoteFile {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    RemoteFile {
      id: id.into(),
      name: name.into(),
      created_time: None,
      mime_type: None,
    }
  }
}

/// Counters reported at the end of every batch operation.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
  pub total: usize,
  pub processed: usize,
  pub skipped: usize,
  pub errors: usize,
}

#[cfg(test)]
mod tests {
  use super::{BookRecord, RemoteFile, Saga};

  #[test]
  fn unknown_keys_survive_a_round_trip() {
    let raw = r#"{"id":"f1","title":"Dune","shelfNote":"signed copy","saga":{"name":"Dune","number":1}}"#;
    let record: BookRecord = serde_json::from_str(raw).unwrap();
    assert_eq!(record.extra.get("shelfNote").and_then(|v| v.as_str()), Some("signed copy"));
    assert_eq!(
      record.saga,
      Some(Saga {
        name: "Dune".to_string(),
        number: Some(1)
      })
    );

    let written = serde_json::to_value(&record).unwrap();
    assert_eq!(written["shelfNote"], "signed copy");
    assert!(written.get("coverUrl").is_none());
  }

  #[test]
  fn record_key_uses_saga_fields() {
    let mut record = BookRecord::new("a");
    record.title = Some("Dune".to_string());
    record.author = Some("Frank Herbert".to_string());
    record.saga = Some(Saga {
      name: "Dune Saga".to_string(),
      number: Some(1),
    });
    assert_eq!(record.canonical_key().as_str(), "dune|frank herbert|dune saga|1");
  }

  #[test]
  fn remote_file_parses_drive_timestamps() {
    let raw = r#"{"id":"x","name":"Dune.epub","createdTime":"2024-03-01T10:00:00.000Z","mimeType":"application/epub+zip"}"#;
    let file: RemoteFile = serde_json::from_str(raw).unwrap();
    assert!(file.created_time.is_some());
    assert_eq!(file.mime_type.as_deref(), Some("application/epub+zip"));
  }
}
