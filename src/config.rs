use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};

pub const DEFAULT_CATALOG: &str = "books.json";
pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
pub const BOOKS_BASE_URL: &str = "https://www.googleapis.com/books/v1";

/// Settings shared by every command.
///
/// Resolution order: built-in defaults, then the optional JSON config file,
/// then `SHELF_*` environment variables (a `.env` file is read first), then
/// whatever the CLI flags override afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
  pub catalog_path: PathBuf,
  pub credentials_path: Option<PathBuf>,
  pub folder_id: Option<String>,
  pub api_key: Option<String>,
  pub request_delay_ms: u64,
  pub checkpoint_every: usize,
  pub drive_base_url: String,
  pub books_base_url: String,
  #[serde(skip)]
  access_token: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      catalog_path: PathBuf::from(DEFAULT_CATALOG),
      credentials_path: None,
      folder_id: None,
      api_key: None,
      request_delay_ms: 300,
      checkpoint_every: 20,
      drive_base_url: DRIVE_BASE_URL.to_string(),
      books_base_url: BOOKS_BASE_URL.to_string(),
      access_token: None,
    }
  }
}

#[derive(Deserialize)]
struct Credentials {
  #[serde(alias = "accessToken")]
  access_token: String,
}

impl Config {
  pub fn load(path: Option<&Path>) -> Result<Self> {
    if let Ok(env_file) = dotenvy::dotenv() {
      log::debug!("read environment from {}", env_file.display());
    }
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self> {
    let raw = fs::read_to_string(path)
      .map_err(|err| ShelfError::Config(format!("cannot read {}: {}", path.display(), err)))?;
    serde_json::from_str(&raw)
      .map_err(|err| ShelfError::Config(format!("invalid config {}: {}", path.display(), err)))
  }

  /// Applies `SHELF_*` overrides taken from `lookup`.
  pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = get("SHELF_CATALOG") {
      self.catalog_path = PathBuf::from(value);
    }
    if let Some(value) = get("SHELF_CREDENTIALS_PATH") {
      self.credentials_path = Some(PathBuf::from(value));
    }
    if let Some(value) = get("SHELF_FOLDER_ID") {
      self.folder_id = Some(value);
    }
    if let Some(value) = get("SHELF_API_KEY") {
      self.api_key = Some(value);
    }
    if let Some(value) = get("SHELF_ACCESS_TOKEN") {
      self.access_token = Some(value);
    }
    if let Some(value) = get("SHELF_REQUEST_DELAY_MS") {
      self.request_delay_ms = parse_number("SHELF_REQUEST_DELAY_MS", &value)?;
    }
    if let Some(value) = get("SHELF_CHECKPOINT_EVERY") {
      self.checkpoint_every = parse_number("SHELF_CHECKPOINT_EVERY", &value)?;
    }
    Ok(())
  }

  pub fn request_delay(&self) -> Duration {
    Duration::from_millis(self.request_delay_ms)
  }

  pub fn require_folder_id(&self) -> Result<&str> {
    self
      .folder_id
      .as_deref()
      .ok_or_else(|| ShelfError::Config("no folder id: set folderId or SHELF_FOLDER_ID".to_string()))
  }

  /// Bearer token for the storage API: `SHELF_ACCESS_TOKEN` first, then the
  /// `access_token` field of the credentials file.
  pub fn access_token(&self) -> Result<String> {
    if let Some(token) = &self.access_token {
      return Ok(token.clone());
    }
    let path = self.credentials_path.as_ref().ok_or_else(|| {
      ShelfError::Config(
        "no access token: set SHELF_ACCESS_TOKEN or credentialsPath".to_string(),
      )
    })?;
    let raw = fs::read_to_string(path)
      .map_err(|err| ShelfError::Config(format!("cannot read {}: {}", path.display(), err)))?;
    let credentials: Credentials = serde_json::from_str(&raw).map_err(|err| {
      ShelfError::Config(format!("invalid credentials {}: {}", path.display(), err))
    })?;
    if credentials.access_token.trim().is_empty() {
      return Err(ShelfError::Config(format!(
        "credentials {} hold an empty access token",
        path.display()
      )));
    }
    Ok(credentials.access_token)
  }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
  value
    .trim()
    .parse::<T>()
    .map_err(|_| ShelfError::Config(format!("{} must be a whole number, got {:?}", key, value)))
}
