use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::{Config, DRIVE_BASE_URL};
use crate::error::Result;
use crate::http::{self, RetryPolicy};
use crate::models::RemoteFile;

const SERVICE: &str = "drive";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: &str = "1000";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, createdTime, mimeType)";

/// The cloud folder holding the library files.
pub trait RemoteStore {
  /// Every non-folder, non-trashed file in the folder, in listing order.
  fn list_files(&self) -> Result<Vec<RemoteFile>>;
  fn delete_file(&self, id: &str) -> Result<()>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
  #[serde(default)]
  files: Vec<RemoteFile>,
  next_page_token: Option<String>,
}

/// Google Drive v3 client for one folder, authenticated with a bearer token.
pub struct DriveClient {
  http: Client,
  base_url: String,
  token: String,
  folder_id: String,
  retry: RetryPolicy,
}

impl DriveClient {
  pub fn new(token: String, folder_id: String) -> Result<Self> {
    Self::with_base_url(token, folder_id, DRIVE_BASE_URL.to_string())
  }

  pub fn with_base_url(token: String, folder_id: String, base_url: String) -> Result<Self> {
    Ok(DriveClient {
      http: http::build_client()?,
      base_url: base_url.trim_end_matches('/').to_string(),
      token,
      folder_id,
      retry: RetryPolicy::default(),
    })
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    let folder_id = config.require_folder_id()?.to_string();
    let token = config.access_token()?;
    Self::with_base_url(token, folder_id, config.drive_base_url.clone())
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn folder_query(&self) -> String {
    format!(
      "'{}' in parents and trashed = false and mimeType != '{}'",
      self.folder_id.replace('\'', "\\'"),
      FOLDER_MIME
    )
  }
}

impl RemoteStore for DriveClient {
  fn list_files(&self) -> Result<Vec<RemoteFile>> {
    let url = format!("{}/files", self.base_url);
    let query = self.folder_query();
    let mut files = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
      let response = http::send_with_retry(SERVICE, &self.retry, || {
        let mut request = self
          .http
          .get(&url)
          .bearer_auth(&self.token)
          .query(&[("q", query.as_str()), ("fields", LIST_FIELDS), ("pageSize", PAGE_SIZE)]);
        if let Some(token) = page_token.as_deref() {
          request = request.query(&[("pageToken", token)]);
        }
        request
      })?;
      let page: FileListPage = response.json()?;
      pages += 1;
      files.extend(
        page
          .files
          .into_iter()
          .filter(|file| file.mime_type.as_deref() != Some(FOLDER_MIME)),
      );

      match page.next_page_token.filter(|token| !token.is_empty()) {
        Some(token) => page_token = Some(token),
        None => break,
      }
    }

    log::info!("listed {} remote files in {} page(s)", files.len(), pages);
    Ok(files)
  }

  fn delete_file(&self, id: &str) -> Result<()> {
    let url = format!("{}/files/{}", self.base_url, urlencoding::encode(id));
    http::send_with_retry(SERVICE, &self.retry, || {
      self.http.delete(&url).bearer_auth(&self.token)
    })?;
    log::info!("deleted remote file {}", id);
    Ok(())
  }
}
