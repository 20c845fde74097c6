//! Snapshot files, run-state persistence, retry policy and photo fetching for the migrator.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use q4mig_core::{
    ContentKind, GlobalState, RunState, SiteEntry, SiteRunState, Snapshot, SnapshotPayload,
    SNAPSHOT_SCHEMA_VERSION,
};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "q4mig-storage";

pub fn load_site_registry(path: impl AsRef<Path>) -> anyhow::Result<Vec<SiteEntry>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading site registry {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing site registry {}", path.display()))
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {} does not exist; run the matching scrape first", path.display())]
    Missing { path: PathBuf },
    #[error("snapshot {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("snapshot {} holds {found}, expected {expected}", path.display())]
    WrongKind {
        path: PathBuf,
        found: String,
        expected: ContentKind,
    },
    #[error("snapshot {} has schema version {found}, expected {expected}", path.display())]
    Incompatible {
        path: PathBuf,
        found: u64,
        expected: u32,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_hash: String,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Per-site JSON snapshots laid out as `<root>/<site>/<kind file>`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn site_dir(&self, site: &str) -> PathBuf {
        self.root.join(site)
    }

    pub fn path_for(&self, site: &str, kind: ContentKind) -> PathBuf {
        self.site_dir(site).join(kind.file_name())
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Replace the snapshot for `site` in one atomic rename.
    pub async fn write<T: SnapshotPayload>(
        &self,
        site: &str,
        payload: T,
    ) -> Result<PathBuf, SnapshotError> {
        let snapshot = Snapshot::new(site, payload);
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .with_context(|| format!("serializing {} snapshot for {site}", T::KIND))?;
        let path = self.path_for(site, T::KIND);
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    pub async fn read<T: SnapshotPayload>(&self, site: &str) -> Result<Snapshot<T>, SnapshotError> {
        let path = self.path_for(site, T::KIND);
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("checking snapshot path {}", path.display()))?
        {
            return Err(SnapshotError::Missing { path });
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        decode_snapshot(&path, &text)
    }

    pub async fn exists(&self, site: &str, kind: ContentKind) -> bool {
        fs::try_exists(self.path_for(site, kind))
            .await
            .unwrap_or(false)
    }

    /// Store bytes under a hash-addressed name inside the site's `subdir`.
    pub async fn store_blob(
        &self,
        site: &str,
        subdir: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredBlob> {
        let content_hash = Self::sha256_hex(bytes);
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        let absolute_path = self
            .site_dir(site)
            .join(subdir)
            .join(format!("{content_hash}.{ext}"));

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking blob path {}", absolute_path.display()))?
        {
            return Ok(StoredBlob {
                content_hash,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        write_atomic(&absolute_path, bytes).await?;
        Ok(StoredBlob {
            content_hash,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }
}

fn decode_snapshot<T: SnapshotPayload>(path: &Path, text: &str) -> Result<Snapshot<T>, SnapshotError> {
    let value: JsonValue = serde_json::from_str(text).map_err(|e| SnapshotError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let kind = value.get("contentKind").and_then(JsonValue::as_str);
    let expected_kind = serde_json::to_value(T::KIND)
        .ok()
        .and_then(|v| v.as_str().map(ToString::to_string))
        .unwrap_or_default();
    if kind != Some(expected_kind.as_str()) {
        return Err(SnapshotError::WrongKind {
            path: path.to_path_buf(),
            found: kind.unwrap_or("<none>").to_string(),
            expected: T::KIND,
        });
    }

    let version = value
        .get("schemaVersion")
        .and_then(JsonValue::as_u64)
        .unwrap_or(0);
    if version != u64::from(SNAPSHOT_SCHEMA_VERSION) {
        return Err(SnapshotError::Incompatible {
            path: path.to_path_buf(),
            found: version,
            expected: SNAPSHOT_SCHEMA_VERSION,
        });
    }

    serde_json::from_value(value).map_err(|e| SnapshotError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write through a sibling temp file and rename over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Where the run-state record lives between process runs.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<RunState>>;
    async fn save(&self, state: &RunState) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStatePersistence {
    path: PathBuf,
}

impl JsonFileStatePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StatePersistence for JsonFileStatePersistence {
    async fn load(&self) -> anyhow::Result<Option<RunState>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let state = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &RunState) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(state).context("serializing run-state")?;
        write_atomic(&self.path, &bytes).await
    }
}

/// Keeps the last saved state in memory; used where no file should be touched.
#[derive(Debug, Default)]
pub struct MemoryStatePersistence {
    saved: Mutex<Option<RunState>>,
    saves: Mutex<usize>,
}

impl MemoryStatePersistence {
    pub fn with_state(state: RunState) -> Self {
        Self {
            saved: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }

    pub async fn last_saved(&self) -> Option<RunState> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl StatePersistence for MemoryStatePersistence {
    async fn load(&self) -> anyhow::Result<Option<RunState>> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, state: &RunState) -> anyhow::Result<()> {
        *self.saved.lock().await = Some(state.clone());
        *self.saves.lock().await += 1;
        Ok(())
    }
}

/// Run-state shared by the orchestrator and operations. Every mutation is persisted
/// before the lock is released, so writes from one process never interleave.
pub struct StateStore {
    persistence: Arc<dyn StatePersistence>,
    state: Mutex<RunState>,
}

impl StateStore {
    pub async fn open(persistence: Arc<dyn StatePersistence>) -> anyhow::Result<Self> {
        let state = persistence.load().await?.unwrap_or_default();
        Ok(Self {
            persistence,
            state: Mutex::new(state),
        })
    }

    pub async fn snapshot(&self) -> RunState {
        self.state.lock().await.clone()
    }

    pub async fn site(&self, key: &str) -> SiteRunState {
        self.state
            .lock()
            .await
            .sites
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn update_site<F>(&self, key: &str, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut SiteRunState),
    {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let site = state.sites.entry(key.to_string()).or_default();
        f(site);
        site.updated_at = Some(now);
        state.global.last_updated = Some(now);
        self.persistence
            .save(&state)
            .await
            .with_context(|| format!("persisting run-state for {key}"))
    }

    pub async fn update_global<F>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut GlobalState),
    {
        let mut state = self.state.lock().await;
        f(&mut state.global);
        state.global.last_updated = Some(Utc::now());
        self.persistence
            .save(&state)
            .await
            .context("persisting global run-state")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Run `action` until it succeeds, `is_fatal` says stop, or attempts run out.
/// The attempt index (0-based) is handed to the action.
pub async fn retry_bounded<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    label: &str,
    mut action: F,
    is_fatal: P,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match action(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if is_fatal(&err) || attempt + 1 >= attempts {
                    warn!(label, attempt = attempt + 1, error = %err, "giving up");
                    return Err(err);
                }
                debug!(label, attempt = attempt + 1, error = %err, "retrying");
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetch limiter closed")]
    Closed,
}

/// Downloads public assets (person photos) referenced by scraped snapshots.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, site: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self.limit.acquire().await.map_err(|_| FetchError::Closed)?;
        let span = info_span!("http_fetch", site, url);

        let outcome: Result<FetchedResponse, FetchError> = async {
            let mut attempt = 0;
            loop {
                let last_attempt = attempt + 1 >= self.backoff.max_attempts.max(1);
                match self.client.get(url).send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        let final_url = resp.url().to_string();
                        if status.is_success() {
                            let content_type = resp
                                .headers()
                                .get(reqwest::header::CONTENT_TYPE)
                                .and_then(|v| v.to_str().ok())
                                .map(ToString::to_string);
                            let body = match resp.bytes().await {
                                Ok(bytes) => bytes.to_vec(),
                                Err(err) => return Err(FetchError::Request(err)),
                            };
                            return Ok(FetchedResponse {
                                status,
                                final_url,
                                content_type,
                                body,
                            });
                        }
                        if classify_status(status) == RetryDisposition::NonRetryable || last_attempt {
                            return Err(FetchError::HttpStatus {
                                status: status.as_u16(),
                                url: final_url,
                            });
                        }
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                            || last_attempt
                        {
                            return Err(FetchError::Request(err));
                        }
                    }
                }
                tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
        .instrument(span)
        .await;
        outcome
    }
}

/// File extension for a downloaded image, from its content type or URL.
pub fn image_extension(content_type: Option<&str>, url: &str) -> &'static str {
    match content_type.map(|c| c.split(';').next().unwrap_or(c).trim()) {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        _ => {
            let lower = url
                .split(['?', '#'])
                .next()
                .unwrap_or(url)
                .to_ascii_lowercase();
            if lower.ends_with(".png") {
                "png"
            } else if lower.ends_with(".gif") {
                "gif"
            } else if lower.ends_with(".webp") {
                "webp"
            } else {
                "jpg"
            }
        }
    }
}
