//! Remote content store.
//!
//! [`RemoteStore`] is the typed read (and single write) boundary to the
//! repository that holds the content. [`GitHubStore`] implements it over the
//! GitHub contents API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list a directory | `GET /repos/{owner}/{repo}/contents/{path}?ref={branch}` |
//! | read a file | same URL, base64 `content` field decoded |
//! | write a file | `PUT /repos/{owner}/{repo}/contents/{path}` |
//! | create a branch | `GET .../git/refs/heads/{branch}`, then `POST .../git/refs` |
//! | open a pull request | `POST /repos/{owner}/{repo}/pulls` |
//!
//! # Rate limiting
//!
//! Every request goes through a [`RateLimiter`] that caps both the number of
//! requests in flight and the rate at which new requests start. Callers
//! cannot bypass it.
//!
//! # Errors
//!
//! | Response | Error |
//! |----------|-------|
//! | 404 | [`RemoteError::NotFound`] |
//! | 403, 429 | [`RemoteError::RateLimited`] |
//! | timeout, network failure, other status | [`RemoteError::Unreachable`] |
//!
//! # Pagination
//!
//! Listings follow `Link: <…>; rel="next"` headers until the last page.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::models::{FileKind, FileRef};

/// A pull request opened on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

/// Read access (plus content creation) on a remote content repository.
///
/// Write operations authenticate with the caller's opaque token, never with
/// the store's own read token.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the entries of a directory.
    async fn list_directory(&self, path: &str) -> Result<Vec<FileRef>, RemoteError>;

    /// Read a file's raw bytes.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Create or replace a file on the configured branch.
    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        token: &str,
    ) -> Result<(), RemoteError>;

    /// Create `branch` at the head of the configured branch.
    async fn create_branch(&self, branch: &str, token: &str) -> Result<(), RemoteError>;

    /// Open a pull request from `head` into the configured branch.
    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        token: &str,
    ) -> Result<PullRequest, RemoteError>;
}

// ============ Rate limiter ============

/// Caps in-flight requests and spaces request starts evenly.
pub struct RateLimiter {
    in_flight: Semaphore,
    min_interval: Duration,
    next_start: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests_per_sec: u32, max_in_flight: usize) -> Self {
        let per_sec = max_requests_per_sec.max(1);
        Self {
            in_flight: Semaphore::new(max_in_flight.max(1)),
            min_interval: Duration::from_secs(1) / per_sec,
            next_start: Mutex::new(Instant::now()),
        }
    }

    /// Wait for a request slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, RemoteError> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| RemoteError::Unreachable("rate limiter closed".to_string()))?;

        let mut next = self.next_start.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep_until(*next).await;
        }
        *next = (*next).max(now) + self.min_interval;
        Ok(permit)
    }
}

// ============ GitHub contents API ============

/// [`RemoteStore`] backed by the GitHub contents API.
pub struct GitHubStore {
    client: reqwest::Client,
    repo_url: String,
    branch: String,
    token: Option<String>,
    limiter: RateLimiter,
}

#[derive(Deserialize)]
struct ContentsEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct ContentsFile {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
    #[serde(default)]
    sha: Option<String>,
}

impl GitHubStore {
    /// Build a store from configuration. The read token, if any, comes from
    /// the environment variable named by `token_env`.
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            repo_url: format!(
                "{}/repos/{}/{}",
                config.api_base.trim_end_matches('/'),
                config.owner,
                config.repo
            ),
            branch: config.branch.clone(),
            token: config.token(),
            limiter: RateLimiter::new(config.max_requests_per_sec, config.max_in_flight),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        let encoded = path
            .trim_matches('/')
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/contents/{}", self.repo_url, encoded)
    }

    fn request(&self, method: Method, url: &str, token: Option<&str>) -> RequestBuilder {
        let req = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header(USER_AGENT, concat!("sidebar-sync/", env!("CARGO_PKG_VERSION")));
        match token {
            Some(token) => req.header(AUTHORIZATION, format!("token {}", token)),
            None => req,
        }
    }

    /// Send through the limiter, mapping transport failures and non-2xx
    /// statuses to [`RemoteError`].
    async fn send(&self, req: RequestBuilder, what: &str) -> Result<reqwest::Response, RemoteError> {
        let _permit = self.limiter.acquire().await?;
        let resp = req.send().await.map_err(|e| transport_error(what, e))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(status_error(resp.status(), what))
        }
    }

    async fn get(&self, url: &str, path: &str) -> Result<reqwest::Response, RemoteError> {
        debug!(%url, "GET");
        let req = self.request(Method::GET, url, self.token.as_deref());
        self.send(req, path).await
    }

    async fn current_sha(&self, path: &str, token: &str) -> Result<Option<String>, RemoteError> {
        let url = format!("{}?ref={}", self.contents_url(path), self.branch);
        let _permit = self.limiter.acquire().await?;
        let resp = self
            .request(Method::GET, &url, Some(token))
            .send()
            .await
            .map_err(|e| transport_error(path, e))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let file: ContentsFile = resp
                    .json()
                    .await
                    .map_err(|e| RemoteError::Unreachable(format!("{}: {}", path, e)))?;
                Ok(file.sha)
            }
            s => Err(status_error(s, path)),
        }
    }
}

#[async_trait]
impl RemoteStore for GitHubStore {
    async fn list_directory(&self, path: &str) -> Result<Vec<FileRef>, RemoteError> {
        let mut entries = Vec::new();
        let mut next_url = Some(format!("{}?ref={}", self.contents_url(path), self.branch));

        while let Some(url) = next_url.take() {
            let resp = self.get(&url, path).await?;
            next_url = next_link(resp.headers());

            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| RemoteError::Unreachable(format!("{}: {}", path, e)))?;
            if !body.is_array() {
                return Err(RemoteError::NotFound(format!("{} is not a directory", path)));
            }
            let page: Vec<ContentsEntry> = serde_json::from_value(body)
                .map_err(|e| RemoteError::Unreachable(format!("{}: {}", path, e)))?;

            entries.extend(page.into_iter().map(|e| FileRef {
                kind: FileKind::from_api(&e.kind),
                updated_at: e
                    .updated_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                name: e.name,
                path: e.path,
            }));
        }

        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let url = format!("{}?ref={}", self.contents_url(path), self.branch);
        let resp = self.get(&url, path).await?;
        let file: ContentsFile = resp
            .json()
            .await
            .map_err(|e| RemoteError::Unreachable(format!("{}: {}", path, e)))?;

        if file.encoding != "base64" {
            return Err(RemoteError::Unreachable(format!(
                "{}: unsupported content encoding '{}'",
                path, file.encoding
            )));
        }
        decode_content(&file.content)
            .map_err(|e| RemoteError::Unreachable(format!("{}: {}", path, e)))
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        token: &str,
    ) -> Result<(), RemoteError> {
        let sha = self.current_sha(path, token).await?;

        let mut body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "branch": self.branch,
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha);
        }

        let req = self
            .request(Method::PUT, &self.contents_url(path), Some(token))
            .json(&body);
        self.send(req, path).await?;
        Ok(())
    }

    async fn create_branch(&self, branch: &str, token: &str) -> Result<(), RemoteError> {
        let base_url = format!("{}/git/refs/heads/{}", self.repo_url, uri_encode(&self.branch));
        let base: GitRef = self
            .send(self.request(Method::GET, &base_url, Some(token)), &self.branch)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Unreachable(format!("{}: {}", self.branch, e)))?;

        let body = serde_json::json!({
            "ref": format!("refs/heads/{}", branch),
            "sha": base.object.sha,
        });
        let req = self
            .request(Method::POST, &format!("{}/git/refs", self.repo_url), Some(token))
            .json(&body);
        self.send(req, branch).await?;
        debug!(branch, from = %self.branch, "branch created");
        Ok(())
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        token: &str,
    ) -> Result<PullRequest, RemoteError> {
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "head": head,
            "base": self.branch,
        });
        let req = self
            .request(Method::POST, &format!("{}/pulls", self.repo_url), Some(token))
            .json(&payload);
        self.send(req, head)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Unreachable(format!("{}: {}", head, e)))
    }
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

// ============ In-memory store ============

/// In-memory [`RemoteStore`] for tests and local experiments.
///
/// Files live in a flat path → bytes map; directories are implied by path
/// prefixes. Listings and reads can be made to fail per path, and listings
/// can be paused to hold a discovery pass mid-flight.
#[derive(Default)]
pub struct MemoryStore {
    files: StdMutex<BTreeMap<String, Vec<u8>>>,
    listing_errors: StdMutex<HashMap<String, RemoteError>>,
    read_errors: StdMutex<HashMap<String, RemoteError>>,
    paused: StdMutex<Option<watch::Sender<bool>>>,
    branches: StdMutex<Vec<String>>,
    pulls: StdMutex<Vec<(String, String)>>,
    listings: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `files`.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let store = Self::new();
        for (path, body) in files {
            store.put(path, body);
        }
        store
    }

    pub fn put(&self, path: &str, body: &str) {
        lock(&self.files).insert(path.trim_matches('/').to_string(), body.as_bytes().to_vec());
    }

    pub fn remove(&self, path: &str) {
        lock(&self.files).remove(path.trim_matches('/'));
    }

    pub fn get(&self, path: &str) -> Option<String> {
        lock(&self.files)
            .get(path.trim_matches('/'))
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Make listings of `dir` fail with `err` until cleared.
    pub fn fail_listing(&self, dir: &str, err: RemoteError) {
        lock(&self.listing_errors).insert(dir.to_string(), err);
    }

    /// Make reads of `path` fail with `err` until cleared.
    pub fn fail_read(&self, path: &str, err: RemoteError) {
        lock(&self.read_errors).insert(path.to_string(), err);
    }

    pub fn clear_failures(&self) {
        lock(&self.listing_errors).clear();
        lock(&self.read_errors).clear();
    }

    /// Hold every subsequent listing call until [`resume`](Self::resume).
    pub fn pause(&self) {
        let (tx, _) = watch::channel(false);
        *lock(&self.paused) = Some(tx);
    }

    pub fn resume(&self) {
        if let Some(tx) = lock(&self.paused).take() {
            let _ = tx.send(true);
        }
    }

    pub fn listing_calls(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Branches created so far, in creation order.
    pub fn branches(&self) -> Vec<String> {
        lock(&self.branches).clone()
    }

    /// `(title, head)` of every pull request opened so far.
    pub fn pull_requests(&self) -> Vec<(String, String)> {
        lock(&self.pulls).clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_directory(&self, path: &str) -> Result<Vec<FileRef>, RemoteError> {
        self.listings.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.paused).as_ref().map(|tx| tx.subscribe());
        if let Some(mut gate) = gate {
            // A dropped sender also releases the wait.
            let _ = gate.wait_for(|open| *open).await;
        }

        if let Some(err) = lock(&self.listing_errors).get(path) {
            return Err(err.clone());
        }

        let dir = path.trim_matches('/');
        let prefix = format!("{}/", dir);
        let files = lock(&self.files);
        let mut entries: Vec<FileRef> = Vec::new();
        for key in files.keys().filter(|k| k.starts_with(&prefix)) {
            let rest = &key[prefix.len()..];
            let entry = match rest.split_once('/') {
                None => FileRef {
                    name: rest.to_string(),
                    path: key.clone(),
                    kind: FileKind::File,
                    updated_at: None,
                },
                Some((sub, _)) => FileRef {
                    name: sub.to_string(),
                    path: format!("{}{}", prefix, sub),
                    kind: FileKind::Dir,
                    updated_at: None,
                },
            };
            if !entries.iter().any(|e| e.path == entry.path) {
                entries.push(entry);
            }
        }

        if entries.is_empty() {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.read_errors).get(path) {
            return Err(err.clone());
        }
        lock(&self.files)
            .get(path.trim_matches('/'))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        _message: &str,
        _token: &str,
    ) -> Result<(), RemoteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.files).insert(path.trim_matches('/').to_string(), content.to_vec());
        Ok(())
    }

    async fn create_branch(&self, branch: &str, _token: &str) -> Result<(), RemoteError> {
        let mut branches = lock(&self.branches);
        if branches.iter().any(|b| b == branch) {
            return Err(RemoteError::Unreachable(format!(
                "{} (HTTP 422 Unprocessable Entity)",
                branch
            )));
        }
        branches.push(branch.to_string());
        Ok(())
    }

    async fn create_pull_request(
        &self,
        title: &str,
        _body: &str,
        head: &str,
        _token: &str,
    ) -> Result<PullRequest, RemoteError> {
        if !lock(&self.branches).iter().any(|b| b == head) {
            return Err(RemoteError::NotFound(head.to_string()));
        }
        let mut pulls = lock(&self.pulls);
        pulls.push((title.to_string(), head.to_string()));
        let number = pulls.len() as u64;
        Ok(PullRequest {
            number,
            html_url: format!("memory://pulls/{}", number),
        })
    }
}

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ============ Helpers ============

fn status_error(status: StatusCode, path: &str) -> RemoteError {
    match status.as_u16() {
        404 => RemoteError::NotFound(path.to_string()),
        403 | 429 => RemoteError::RateLimited(format!("{} (HTTP {})", path, status.as_u16())),
        _ => RemoteError::Unreachable(format!("{} (HTTP {})", path, status)),
    }
}

fn transport_error(path: &str, err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Unreachable(format!("{}: request timed out", path))
    } else {
        RemoteError::Unreachable(format!("{}: {}", path, err))
    }
}

/// Decode the contents API's base64 payload, which is wrapped at 60 columns.
fn decode_content(content: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(compact)
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"" || p.trim() == "rel=next");
        is_next.then(|| {
            target
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

/// Percent-encode one path segment per RFC 3986.
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
