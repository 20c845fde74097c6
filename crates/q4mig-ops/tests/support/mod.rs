#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use q4mig_core::SiteEntry;
use q4mig_ops::{DrainConfig, MatchConfig, OpContext, Photo, PhotoSource, RetryPolicy, RunConfig};
use q4mig_screens::fake::FakeLauncher;
use q4mig_screens::{BrowserLauncher, Credentials};
use q4mig_storage::{MemoryStatePersistence, SnapshotStore, StatePersistence, StateStore};
use tempfile::TempDir;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-photo";

/// Serves a fixed PNG for every URL except those containing `missing`.
#[derive(Debug, Default)]
pub struct StaticPhotos {
    requests: Mutex<Vec<String>>,
}

impl StaticPhotos {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PhotoSource for StaticPhotos {
    async fn fetch_photo(&self, _site: &str, url: &str) -> anyhow::Result<Photo> {
        self.requests.lock().unwrap().push(url.to_string());
        if url.contains("missing") {
            anyhow::bail!("http status 404 for {url}");
        }
        Ok(Photo {
            bytes: PNG_BYTES.to_vec(),
            content_type: Some("image/png".to_string()),
        })
    }
}

pub struct Harness {
    pub ctx: Arc<OpContext>,
    pub persistence: Arc<MemoryStatePersistence>,
    pub photos: Arc<StaticPhotos>,
    pub dir: TempDir,
}

pub fn site(name: &str) -> SiteEntry {
    SiteEntry {
        name: name.to_string(),
        source: format!("{name}-old"),
        destination: name.to_string(),
    }
}

pub fn base_url(subdomain: &str) -> String {
    format!("https://{subdomain}.example")
}

pub async fn harness(launcher: FakeLauncher) -> Harness {
    harness_with(launcher, 2).await
}

pub async fn harness_with(
    launcher: impl BrowserLauncher + 'static,
    max_concurrent_sites: usize,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(MemoryStatePersistence::default());
    let photos = Arc::new(StaticPhotos::default());
    let state_port: Arc<dyn StatePersistence> = persistence.clone();
    let config = RunConfig {
        data_dir: dir.path().to_path_buf(),
        admin_url_template: "https://{subdomain}.example".to_string(),
        max_concurrent_sites,
        step_delay: Duration::ZERO,
        wait_timeout: Duration::ZERO,
        ..RunConfig::default()
    };
    let ctx = OpContext {
        snapshots: SnapshotStore::new(dir.path()),
        config,
        retry: RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
            empty_answer_retries: 3,
        },
        drain: DrainConfig::default(),
        matching: MatchConfig::default(),
        state: Arc::new(StateStore::open(state_port).await.unwrap()),
        launcher: Arc::new(launcher),
        credentials: Credentials::new("ops", "secret"),
        photos: photos.clone(),
    };
    Harness {
        ctx: Arc::new(ctx),
        persistence,
        photos,
        dir,
    }
}
