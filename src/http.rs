//! Blocking HTTP plumbing shared by the storage and metadata clients.

use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;

use crate::error::{Result, ShelfError};

const HTTP_TIMEOUT_SECS: u64 = 15;
const HTTP_USER_AGENT: &str = concat!("shelf/", env!("CARGO_PKG_VERSION"));
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Bounded retry for rate-limited (429) and 5xx responses.
///
/// `backoff[i]` is the wait before retry `i + 1`; when the schedule is
/// shorter than the number of retries its last entry repeats. A
/// `Retry-After` header replaces the scheduled wait.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy {
      max_attempts: 3,
      backoff: vec![Duration::from_secs(2), Duration::from_secs(5)],
    }
  }
}

impl RetryPolicy {
  /// Retries without waiting.
  pub fn immediate(max_attempts: u32) -> Self {
    RetryPolicy {
      max_attempts,
      backoff: vec![Duration::ZERO],
    }
  }

  fn wait_before_retry(&self, retry: usize) -> Duration {
    self
      .backoff
      .get(retry)
      .or_else(|| self.backoff.last())
      .copied()
      .unwrap_or(Duration::ZERO)
  }
}

pub fn build_client() -> Result<Client> {
  let client = Client::builder()
    .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
    .user_agent(HTTP_USER_AGENT)
    .build()?;
  Ok(client)
}

/// Sends the request built by `build` until it succeeds, fails with a
/// non-retryable status, or `policy.max_attempts` is spent.
pub fn send_with_retry<F>(service: &'static str, policy: &RetryPolicy, build: F) -> Result<Response>
where
  F: Fn() -> RequestBuilder,
{
  let attempts = policy.max_attempts.max(1);
  for attempt in 1..=attempts {
    let retry = (attempt - 1) as usize;
    let response = match build().send() {
      Ok(value) => value,
      Err(err) => {
        if attempt < attempts && (err.is_timeout() || err.is_connect()) {
          log::debug!("{} transport error on attempt {}: {}", service, attempt, err);
          thread::sleep(policy.wait_before_retry(retry));
          continue;
        }
        return Err(err.into());
      }
    };

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS;
    if !rate_limited && !status.is_server_error() {
      return Err(status_error(service, response));
    }
    if attempt == attempts {
      if rate_limited {
        return Err(ShelfError::RateLimited { service, attempts });
      }
      return Err(status_error(service, response));
    }

    let wait = retry_after(&response)
      .unwrap_or_else(|| policy.wait_before_retry(retry))
      .min(MAX_RETRY_AFTER);
    log::warn!(
      "{} returned {} (attempt {}/{}), retrying in {:?}",
      service,
      status.as_u16(),
      attempt,
      attempts,
      wait
    );
    thread::sleep(wait);
  }

  Err(ShelfError::RateLimited { service, attempts })
}

fn retry_after(response: &Response) -> Option<Duration> {
  response
    .headers()
    .get(reqwest::header::RETRY_AFTER)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.trim().parse::<u64>().ok())
    .map(Duration::from_secs)
}

fn status_error(service: &'static str, response: Response) -> ShelfError {
  let status = response.status().as_u16();
  let body = response
    .text()
    .unwrap_or_default()
    .chars()
    .take(MAX_ERROR_BODY_CHARS)
    .collect();
  ShelfError::Status {
    service,
    status,
    body,
  }
}
