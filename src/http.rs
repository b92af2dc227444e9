//! HTTP client for the remote workout account.
//!
//! - Cookie-backed session, logged in lazily on first use and memoized
//! - Login bounded by `login_timeout_secs` (covers a manual CAPTCHA step)
//! - Retry with exponential backoff on transport errors, 429 and 5xx
//!
//! The engine is synchronous, so the client owns a tokio runtime and blocks
//! on each request.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use reqwest::{Client, StatusCode};
use tokio::runtime::Runtime;

use crate::workout::parse_workout_list;
use crate::{RemoteConfig, RemoteSource, Result, SyncError, WorkoutRecord};

const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Account credentials, read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read the variables named by `remote.username_env` / `remote.password_env`.
    pub fn from_env(remote: &RemoteConfig) -> Result<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SyncError::Auth(format!("environment variable {} is not set", name)))
        };
        Ok(Self::new(read(&remote.username_env)?, read(&remote.password_env)?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Blocking [`RemoteSource`] over HTTP.
pub struct HttpWorkoutClient {
    runtime: Runtime,
    client: Client,
    config: RemoteConfig,
    credentials: Credentials,
    session: OnceCell<()>,
}

impl HttpWorkoutClient {
    pub fn new(config: RemoteConfig, credentials: Credentials) -> Result<Self> {
        let runtime = Runtime::new()
            .map_err(|e| SyncError::Config(format!("Failed to create tokio runtime: {}", e)))?;

        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            runtime,
            client,
            config,
            credentials,
            session: OnceCell::new(),
        })
    }

    /// Log in once; later calls reuse the session cookie.
    fn ensure_session(&self) -> Result<()> {
        self.session.get_or_try_init(|| self.login()).map(|_| ())
    }

    fn login(&self) -> Result<()> {
        info!(
            "[HttpClient] Logging in as {} (waiting up to {}s)",
            self.credentials.username, self.config.login_timeout_secs
        );

        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        let request = self.client.post(&self.config.login_url).form(&form).send();
        let limit = Duration::from_secs(self.config.login_timeout_secs);

        let response = self
            .runtime
            .block_on(async { tokio::time::timeout(limit, request).await })
            .map_err(|_| {
                SyncError::Auth(format!(
                    "login did not complete within {}s",
                    self.config.login_timeout_secs
                ))
            })?
            .map_err(|e| network_error(&e))?;

        match status_error(response.status(), "login") {
            None => {
                info!("[HttpClient] Session established");
                Ok(())
            }
            Some(SyncError::NotFound(_)) => Err(SyncError::Config(format!(
                "login URL {} not found",
                self.config.login_url
            ))),
            Some(e) => Err(e),
        }
    }

    /// GET with retries. An auth failure drops the session so the next call
    /// logs in again.
    fn fetch(&mut self, url: &str, what: &str) -> Result<Vec<u8>> {
        self.ensure_session()?;
        let result = self
            .runtime
            .block_on(fetch_with_retry(&self.client, url, what, self.config.max_retries));
        if matches!(result, Err(SyncError::Auth(_))) {
            self.session.take();
        }
        result
    }
}

impl RemoteSource for HttpWorkoutClient {
    fn list_remote_workouts(&mut self) -> Result<Vec<WorkoutRecord>> {
        let url = self.config.csv_export_url.clone();
        let bytes = self.fetch(&url, "workout list")?;
        if looks_like_html(&bytes) {
            self.session.take();
            return Err(SyncError::Auth(
                "workout list export returned a web page; session not accepted".to_string(),
            ));
        }
        let records = parse_workout_list(&bytes, "remote workout list")?;
        info!("[HttpClient] Fetched {} workouts", records.len());
        Ok(records)
    }

    fn download_track(&mut self, workout_id: &str) -> Result<Vec<u8>> {
        let url = self.config.tcx_url(workout_id);
        let bytes = self.fetch(&url, workout_id)?;
        debug!(
            "[HttpClient] Downloaded {} bytes for workout {}",
            bytes.len(),
            workout_id
        );
        Ok(bytes)
    }
}

async fn fetch_with_retry(
    client: &Client,
    url: &str,
    what: &str,
    max_retries: u32,
) -> Result<Vec<u8>> {
    let mut attempt = 0;

    loop {
        let error = match client.get(url).send().await {
            Ok(resp) => match status_error(resp.status(), what) {
                Some(e) => e,
                None => {
                    return resp
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| network_error(&e));
                }
            },
            Err(e) => network_error(&e),
        };

        attempt += 1;
        let Some(backoff) = retry_delay(&error, attempt, max_retries) else {
            return Err(error);
        };
        warn!(
            "[HttpClient] {}, retry {} after {:?}",
            error, attempt, backoff
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Backoff before retry number `attempt`, or `None` once retries are used up
/// or the error is not a transient network failure.
fn retry_delay(error: &SyncError, attempt: u32, max_retries: u32) -> Option<Duration> {
    let retryable = matches!(error, SyncError::Network { .. }) && error.is_retryable();
    (retryable && attempt <= max_retries).then(|| backoff_delay(attempt))
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 16s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS << attempt.min(MAX_BACKOFF_SHIFT))
}

/// Map a non-success status to the error the engine expects.
fn status_error(status: StatusCode, what: &str) -> Option<SyncError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Auth(format!("HTTP {} for {}", status, what))
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(what.to_string()),
        _ => SyncError::Network {
            message: format!("HTTP {} for {}", status, what),
            status_code: Some(status.as_u16()),
        },
    })
}

fn network_error(e: &reqwest::Error) -> SyncError {
    SyncError::Network {
        message: e.to_string(),
        status_code: e.status().map(|s| s.as_u16()),
    }
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let head = &bytes[start..bytes.len().min(start + 15)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(status_error(StatusCode::OK, "x").is_none());
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "x"),
            Some(SyncError::Auth(_))
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "7001"),
            Some(SyncError::NotFound(ref id)) if id == "7001"
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "x"),
            Some(SyncError::Network { status_code: Some(502), .. })
        ));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
        assert_eq!(backoff_delay(12), Duration::from_secs(16));
    }

    #[test]
    fn test_retry_only_transient_failures() {
        let server = status_error(StatusCode::SERVICE_UNAVAILABLE, "x").unwrap();
        let limited = status_error(StatusCode::TOO_MANY_REQUESTS, "x").unwrap();
        let reset = SyncError::Network {
            message: "connection reset".to_string(),
            status_code: None,
        };
        assert_eq!(retry_delay(&server, 1, 3), Some(Duration::from_secs(1)));
        assert_eq!(retry_delay(&limited, 2, 3), Some(Duration::from_secs(2)));
        assert_eq!(retry_delay(&reset, 3, 3), Some(Duration::from_secs(4)));
        assert_eq!(retry_delay(&reset, 4, 3), None);

        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::NOT_FOUND,
            StatusCode::BAD_REQUEST,
        ] {
            let error = status_error(status, "x").unwrap();
            assert_eq!(retry_delay(&error, 1, 3), None, "{}", status);
        }
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html(b"\n  <!DOCTYPE html><html>"));
        assert!(looks_like_html(b"<HTML><body>login</body>"));
        assert!(!looks_like_html(b"Date Submitted,Workout Date\n"));
        assert!(!looks_like_html(b""));
    }

    #[test]
    fn test_credentials_from_env() {
        let remote = RemoteConfig {
            username_env: "WORKOUT_SYNC_TEST_USER_UNSET".to_string(),
            password_env: "WORKOUT_SYNC_TEST_PASS_UNSET".to_string(),
            ..RemoteConfig::default()
        };
        let err = Credentials::from_env(&remote).unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(err.to_string().contains("WORKOUT_SYNC_TEST_USER_UNSET"));

        let debug = format!("{:?}", Credentials::new("me", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
