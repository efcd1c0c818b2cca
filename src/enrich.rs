//! Metadata lookup against a public book API and merging of the result
//! into catalog records.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::{Config, BOOKS_BASE_URL};
use crate::dedup::{self, MAX_SCORE};
use crate::error::Result;
use crate::http::{self, RetryPolicy};
use crate::models::BookRecord;

const SERVICE: &str = "google books";
const MAX_CANDIDATES: usize = 5;
const MIN_CONFIDENCE: f64 = 0.45;

static BRACKET_RE: OnceLock<Regex> = OnceLock::new();
static EDITION_RE: OnceLock<Regex> = OnceLock::new();
static SPACE_RE: OnceLock<Regex> = OnceLock::new();

/// Structured fields of one metadata match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookMetadata {
  pub title: Option<String>,
  pub authors: Vec<String>,
  pub cover_url: Option<String>,
  pub description: Option<String>,
  pub publisher: Option<String>,
  pub published_date: Option<String>,
  pub page_count: Option<u32>,
  pub categories: Vec<String>,
  pub language: Option<String>,
  pub average_rating: Option<f64>,
  pub ratings_count: Option<u64>,
  pub preview_link: Option<String>,
}

/// Source of book metadata, queried by title and optional author.
pub trait MetadataSource {
  /// The best match for the query, if any is good enough.
  fn lookup(&self, title: &str, author: Option<&str>) -> Result<Option<BookMetadata>>;
}

#[derive(Deserialize)]
struct VolumesResponse {
  #[serde(default)]
  items: Vec<Volume>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
  #[serde(default)]
  volume_info: VolumeInfo,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct VolumeInfo {
  title: Option<String>,
  authors: Vec<String>,
  publisher: Option<String>,
  published_date: Option<String>,
  description: Option<String>,
  page_count: Option<u32>,
  categories: Vec<String>,
  average_rating: Option<f64>,
  ratings_count: Option<u64>,
  language: Option<String>,
  preview_link: Option<String>,
  image_links: Option<ImageLinks>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ImageLinks {
  thumbnail: Option<String>,
  small_thumbnail: Option<String>,
}

impl From<VolumeInfo> for BookMetadata {
  fn from(info: VolumeInfo) -> Self {
    let cover_url = info
      .image_links
      .and_then(|links| links.thumbnail.or(links.small_thumbnail))
      .map(|url| url.replace("http://", "https://"));
    BookMetadata {
      title: info.title,
      authors: info.authors,
      cover_url,
      description: info.description,
      publisher: info.publisher,
      published_date: info.published_date,
      page_count: info.page_count.filter(|count| *count > 0),
      categories: info.categories,
      language: info.language,
      average_rating: info.average_rating,
      ratings_count: info.ratings_count,
      preview_link: info.preview_link.map(|url| url.replace("http://", "https://")),
    }
  }
}

pub struct GoogleBooksClient {
  http: Client,
  base_url: String,
  api_key: Option<String>,
  retry: RetryPolicy,
}

impl GoogleBooksClient {
  pub fn new(api_key: Option<String>) -> Result<Self> {
    Self::with_base_url(api_key, BOOKS_BASE_URL.to_string())
  }

  pub fn with_base_url(api_key: Option<String>, base_url: String) -> Result<Self> {
    Ok(GoogleBooksClient {
      http: http::build_client()?,
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key,
      retry: RetryPolicy::default(),
    })
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Self::with_base_url(config.api_key.clone(), config.books_base_url.clone())
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn search(&self, title: &str, author: Option<&str>) -> Result<Vec<BookMetadata>> {
    let mut terms = vec![format!("intitle:{}", title)];
    if let Some(author) = author {
      terms.push(format!("inauthor:{}", author));
    }
    let mut url = format!(
      "{}/volumes?q={}&maxResults={}",
      self.base_url,
      urlencoding::encode(&terms.join(" ")),
      MAX_CANDIDATES
    );
    if let Some(key) = self.api_key.as_deref() {
      url.push_str("&key=");
      url.push_str(&urlencoding::encode(key));
    }

    let response = http::send_with_retry(SERVICE, &self.retry, || self.http.get(&url))?;
    let data: VolumesResponse = response.json()?;
    Ok(
      data
        .items
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|volume| BookMetadata::from(volume.volume_info))
        .collect(),
    )
  }
}

impl MetadataSource for GoogleBooksClient {
  fn lookup(&self, title: &str, author: Option<&str>) -> Result<Option<BookMetadata>> {
    let clean_title = clean_search_title(title);
    if clean_title.is_empty() {
      return Ok(None);
    }
    let clean_author = author.and_then(clean_search_author);

    let mut candidates = self.search(&clean_title, clean_author.as_deref())?;
    if candidates.is_empty() && clean_author.is_some() {
      log::debug!("no results for {:?} with author, retrying title only", clean_title);
      candidates = self.search(&clean_title, None)?;
    }
    Ok(best_candidate(candidates, &clean_title, clean_author.as_deref()))
  }
}

/// Picks the candidate closest to the query. Earlier results start with a
/// higher base confidence; anything under the floor is discarded.
pub fn best_candidate(
  candidates: Vec<BookMetadata>,
  title: &str,
  author: Option<&str>,
) -> Option<BookMetadata> {
  let author = author.unwrap_or("");
  let mut best: Option<(f64, BookMetadata)> = None;
  for (index, candidate) in candidates.into_iter().enumerate() {
    let base = 0.75 - index as f64 * 0.05;
    let title_score = similarity(candidate.title.as_deref().unwrap_or(""), title);
    let author_score = if author.is_empty() {
      1.0
    } else {
      similarity(&candidate.authors.join(" "), author)
    };
    let confidence = (base * (title_score * 0.7 + author_score * 0.3)).min(0.95);
    if confidence < MIN_CONFIDENCE {
      continue;
    }
    match &best {
      Some((best_confidence, _)) if confidence <= *best_confidence => {}
      _ => best = Some((confidence, candidate)),
    }
  }
  best.map(|(_, candidate)| candidate)
}

fn similarity(a: &str, b: &str) -> f64 {
  let a_tokens = tokenize(a);
  let b_tokens = tokenize(b);
  if a_tokens.is_empty() || b_tokens.is_empty() {
    return 0.2;
  }
  let intersection = a_tokens.iter().filter(|token| b_tokens.contains(*token)).count();
  let union = a_tokens.union(&b_tokens).count();
  intersection as f64 / union as f64
}

fn tokenize(value: &str) -> HashSet<String> {
  value
    .to_lowercase()
    .replace(|ch: char| !ch.is_alphanumeric() && !ch.is_whitespace(), " ")
    .split_whitespace()
    .map(|token| token.to_string())
    .collect()
}

/// Strips file extensions, download-site tags, edition counters and stray
/// punctuation from a title before it is used as a query.
pub fn clean_search_title(title: &str) -> String {
  let mut cleaned = title.trim().to_string();

  for ext in [".epub", ".pdf", ".mobi", ".azw", ".azw3", ".fb2", ".djvu"] {
    let cut = cleaned.len().saturating_sub(ext.len());
    if cleaned.is_char_boundary(cut) && cleaned[cut..].eq_ignore_ascii_case(ext) {
      cleaned.truncate(cut);
    }
  }

  let bracket_re = BRACKET_RE.get_or_init(|| {
    Regex::new(r"(?i)\s*[\[\(][^\]\)]*(?:calibre|z-lib|epub|pdf|lib\.org|libgen|www\.|http)[^\]\)]*[\]\)]")
      .expect("bracket pattern is valid")
  });
  cleaned = bracket_re.replace_all(&cleaned, "").to_string();

  let edition_re =
    EDITION_RE.get_or_init(|| Regex::new(r"\s*\(\d+\)\s*$").expect("edition pattern is valid"));
  cleaned = edition_re.replace_all(&cleaned, "").to_string();

  cleaned = cleaned.replace('_', " ");
  let space_re = SPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("space pattern is valid"));
  cleaned = space_re.replace_all(&cleaned, " ").to_string();

  cleaned
    .trim()
    .trim_matches(|c: char| !c.is_alphanumeric() && c != ' ')
    .trim()
    .to_string()
}

/// `None` when the author string is too short, mostly non-letters, or a
/// placeholder such as "Unknown".
pub fn clean_search_author(author: &str) -> Option<String> {
  let cleaned = author.trim();
  if cleaned.chars().count() < 2 {
    return None;
  }

  let total = cleaned.chars().count();
  let alpha_count = cleaned.chars().filter(|c| c.is_alphabetic()).count();
  if alpha_count < total / 2 {
    return None;
  }

  let lower = cleaned.to_lowercase();
  if lower.contains("unknown") || lower.contains("various") || lower == "author" {
    return None;
  }

  Some(cleaned.to_string())
}

/// What an enrichment pass is allowed to change.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MergeMode {
  /// Replace fields that already hold a value.
  pub overwrite: bool,
  /// Touch only the cover reference.
  pub covers_only: bool,
}

/// Whether a record is worth a lookup under `mode`.
pub fn needs_enrichment(record: &BookRecord, mode: MergeMode) -> bool {
  let has_title = record
    .title
    .as_deref()
    .map(|title| !title.trim().is_empty())
    .unwrap_or(false);
  if !has_title {
    return false;
  }
  if mode.overwrite {
    return true;
  }
  if mode.covers_only {
    return !record.has_cover();
  }
  dedup::score(record) < MAX_SCORE
}

/// Copies metadata into `record` and returns how many fields changed.
/// Title, author and saga are never touched: they carry the record's
/// identity.
pub fn merge_metadata(record: &mut BookRecord, metadata: &BookMetadata, mode: MergeMode) -> usize {
  let mut changed = 0;
  changed += merge_field(&mut record.cover_url, non_blank(&metadata.cover_url), mode.overwrite);
  if mode.covers_only {
    return changed;
  }

  changed += merge_field(&mut record.description, non_blank(&metadata.description), mode.overwrite);
  changed += merge_field(&mut record.publisher, non_blank(&metadata.publisher), mode.overwrite);
  changed += merge_field(
    &mut record.published_date,
    non_blank(&metadata.published_date),
    mode.overwrite,
  );
  changed += merge_field(&mut record.page_count, metadata.page_count, mode.overwrite);
  let categories = Some(metadata.categories.clone()).filter(|values| !values.is_empty());
  changed += merge_field(&mut record.categories, categories, mode.overwrite);
  changed += merge_field(&mut record.language, non_blank(&metadata.language), mode.overwrite);
  changed += merge_field(&mut record.average_rating, metadata.average_rating, mode.overwrite);
  changed += merge_field(&mut record.ratings_count, metadata.ratings_count, mode.overwrite);
  changed += merge_field(&mut record.preview_link, non_blank(&metadata.preview_link), mode.overwrite);
  changed
}

fn non_blank(value: &Option<String>) -> Option<String> {
  value
    .as_deref()
    .map(str::trim)
    .filter(|inner| !inner.is_empty())
    .map(|inner| inner.to_string())
}

fn merge_field<T: PartialEq + IsBlank>(slot: &mut Option<T>, incoming: Option<T>, overwrite: bool) -> usize {
  let incoming = match incoming {
    Some(value) => value,
    None => return 0,
  };
  let occupied = slot.as_ref().map(|current| !current.is_blank()).unwrap_or(false);
  if occupied && (!overwrite || slot.as_ref() == Some(&incoming)) {
    return 0;
  }
  *slot = Some(incoming);
  1
}

trait IsBlank {
  fn is_blank(&self) -> bool;
}

impl IsBlank for String {
  fn is_blank(&self) -> bool {
    self.trim().is_empty()
  }
}

impl IsBlank for Vec<String> {
  fn is_blank(&self) -> bool {
    self.is_empty()
  }
}

impl IsBlank for u32 {
  fn is_blank(&self) -> bool {
    false
  }
}

impl IsBlank for u64 {
  fn is_blank(&self) -> bool {
    false
  }
}

impl IsBlank for f64 {
  fn is_blank(&self) -> bool {
    false
  }
}
