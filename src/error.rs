use thiserror::Error;

/// Errors surfaced by catalog, remote store and enrichment operations.
#[derive(Debug, Error)]
pub enum ShelfError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid catalog: {0}")]
  InvalidCatalog(String),

  #[error("config error: {0}")]
  Config(String),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{service} returned status {status}: {body}")]
  Status {
    service: &'static str,
    status: u16,
    body: String,
  },

  #[error("{service} still rate limited after {attempts} attempts")]
  RateLimited {
    service: &'static str,
    attempts: u32,
  },
}

impl ShelfError {
  /// Whether the error came from a remote call rather than local input.
  pub fn is_external(&self) -> bool {
    matches!(
      self,
      ShelfError::Http(_) | ShelfError::Status { .. } | ShelfError::RateLimited { .. }
    )
  }
}

pub type Result<T> = std::result::Result<T, ShelfError>;

#[cfg(test)]
mod tests {
  use super::ShelfError;

  #[test]
  fn external_errors_are_classified() {
    let rate_limited = ShelfError::RateLimited {
      service: "google books",
      attempts: 3,
    };
    assert!(rate_limited.is_external());
    assert!(rate_limited.to_string().contains("3 attempts"));

    let invalid = ShelfError::InvalidCatalog("entry 2 has no id".to_string());
    assert!(!invalid.is_external());
  }
}
