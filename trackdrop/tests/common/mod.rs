//! In-process collaborators for driving the engine without yt-dlp, ffmpeg or Telegram.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use trackdrop::database::repositories::{CacheStore, UsageStore};
use trackdrop::engine::{
    Activity, CachedDelivery, DeliveryEngine, DeliverySurface, Dispatcher, EngineCollaborators,
    EngineConfig, MediaSource, Metadata, OwnerId, PipelineDeps, StatusContext, StatusError,
    StatusSurface, TagSet, TaggedArtifact, Tagger, Upload, UsageStats,
};
use trackdrop::{Error, Result};

pub fn track(id: &str, title: &str, attribution: &str) -> Metadata {
    Metadata {
        content_id: id.to_string(),
        title: title.to_string(),
        attribution: attribution.to_string(),
        thumbnail_ref: Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
        source_url: format!("https://youtu.be/{id}"),
        is_collection: false,
        entries: None,
    }
}

pub fn collection_url(list_id: &str) -> String {
    format!("https://www.youtube.com/playlist?list={list_id}")
}

pub fn collection(list_id: &str, title: &str, entries: Vec<Option<Metadata>>) -> Metadata {
    Metadata {
        content_id: list_id.to_string(),
        title: title.to_string(),
        source_url: collection_url(list_id),
        is_collection: true,
        entries: Some(entries),
        ..Default::default()
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Assert that `condition` stays false for `window`.
pub async fn never(what: &str, window: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + window;
    while tokio::time::Instant::now() < deadline {
        assert!(!condition(), "unexpectedly observed: {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation did not finish in time")
}

/// A gate that blocks callers until passes are handed out.
#[derive(Default)]
struct Gate(Mutex<Option<Arc<Semaphore>>>);

impl Gate {
    fn hold(&self) {
        *self.0.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    fn release(&self, passes: usize) {
        if let Some(gate) = self.0.lock().as_ref() {
            gate.add_permits(passes);
        }
    }

    async fn pass(&self) -> Result<()> {
        let gate = self.0.lock().clone();
        if let Some(gate) = gate {
            let pass = gate
                .acquire()
                .await
                .map_err(|_| Error::Other("gate closed".to_string()))?;
            pass.forget();
        }
        Ok(())
    }
}

struct ActiveFetch<'a>(&'a AtomicUsize);

impl Drop for ActiveFetch<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Media source answering from a fixed catalog.
#[derive(Default)]
pub struct FakeSource {
    catalog: Mutex<HashMap<String, Metadata>>,
    failing: Mutex<HashSet<String>>,
    gate: Gate,
    probes: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
    written: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeSource {
    pub fn publish(&self, metadata: Metadata) {
        self.catalog
            .lock()
            .insert(metadata.source_url.clone(), metadata);
    }

    /// Make fetching `identifier` fail.
    pub fn fail_fetch(&self, identifier: &str) {
        self.failing.lock().insert(identifier.to_string());
    }

    /// Block every fetch until [`FakeSource::release`] hands out a pass.
    pub fn hold_fetches(&self) {
        self.gate.hold();
    }

    pub fn release(&self, fetches: usize) {
        self.gate.release(fetches);
    }

    pub fn release_all(&self) {
        self.release(1024);
    }

    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }

    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn probe(&self, identifier: &str) -> Result<Metadata> {
        self.probes.lock().push(identifier.to_string());
        self.catalog
            .lock()
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::Other(format!("no such video: {identifier}")))
    }

    async fn fetch(&self, identifier: &str, dest: &Path) -> Result<PathBuf> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveFetch(&self.active);
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        // in-progress download under yt-dlp's naming, next to the final file
        let partial = dest.with_extension("webm.part");
        tokio::fs::write(&partial, b"partial").await?;
        self.written.lock().push(partial.clone());
        self.fetches.lock().push(identifier.to_string());

        self.gate.pass().await?;

        if self.failing.lock().contains(identifier) {
            return Err(Error::Other(format!("HTTP Error 403 while fetching {identifier}")));
        }
        tokio::fs::write(dest, b"ID3 audio").await?;
        tokio::fs::remove_file(&partial).await?;
        Ok(dest.to_path_buf())
    }
}

/// Tagger that records what it was asked to write. Like ffmpeg it writes a tagged
/// copy next to the input before replacing it.
#[derive(Default)]
pub struct FakeTagger {
    calls: Mutex<Vec<TagSet>>,
    failing: Mutex<HashSet<String>>,
    gate: Gate,
    started: AtomicUsize,
}

impl FakeTagger {
    pub fn calls(&self) -> Vec<TagSet> {
        self.calls.lock().clone()
    }

    /// Make tagging the item titled `title` fail.
    pub fn fail_tags(&self, title: &str) {
        self.failing.lock().insert(title.to_string());
    }

    /// Block tagging after the intermediate file is written.
    pub fn hold_tags(&self) {
        self.gate.hold();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tagger for FakeTagger {
    async fn apply_tags(&self, path: &Path, tags: &TagSet) -> Result<TaggedArtifact> {
        if !path.exists() {
            return Err(Error::Other(format!("{} is missing", path.display())));
        }
        let tagged = path.with_extension("tagged.mp3");
        tokio::fs::copy(path, &tagged).await?;
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await?;

        if self.failing.lock().contains(&tags.title) {
            return Err(Error::Other(format!("ffmpeg exited with 1 tagging {}", tags.title)));
        }
        self.calls.lock().push(tags.clone());
        tokio::fs::rename(&tagged, path).await?;
        Ok(TaggedArtifact {
            path: path.to_path_buf(),
            cover: Some(b"jpeg".to_vec()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub owner_id: OwnerId,
    pub title: String,
    pub attribution: String,
    pub delivery_ref: String,
    pub had_cover: bool,
}

/// Delivery surface keeping every upload in memory.
#[derive(Default)]
pub struct FakeDelivery {
    uploads: Mutex<Vec<Delivered>>,
    resent: Mutex<Vec<String>>,
    stale: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    gate: Gate,
    started: AtomicUsize,
    next_ref: AtomicUsize,
}

impl FakeDelivery {
    pub fn uploads(&self) -> Vec<Delivered> {
        self.uploads.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.uploads.lock().iter().map(|d| d.title.clone()).collect()
    }

    pub fn resent(&self) -> Vec<String> {
        self.resent.lock().clone()
    }

    /// Make re-sending `delivery_ref` report a stale reference.
    pub fn expire(&self, delivery_ref: &str) {
        self.stale.lock().insert(delivery_ref.to_string());
    }

    /// Make uploading the item titled `title` fail.
    pub fn fail_deliver(&self, title: &str) {
        self.failing.lock().insert(title.to_string());
    }

    /// Block uploads until the test drops the engine or cancels.
    pub fn hold_deliveries(&self) {
        self.gate.hold();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySurface for FakeDelivery {
    async fn deliver(&self, owner_id: OwnerId, upload: Upload<'_>) -> Result<String> {
        if !upload.path.exists() {
            return Err(Error::Other(format!("{} is missing", upload.path.display())));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await?;
        if self.failing.lock().contains(upload.title) {
            return Err(Error::Other("Bad Request: file is too big".to_string()));
        }
        let n = self.next_ref.fetch_add(1, Ordering::SeqCst);
        let delivery_ref = format!("file-{n}");
        self.uploads.lock().push(Delivered {
            owner_id,
            title: upload.title.to_string(),
            attribution: upload.attribution.to_string(),
            delivery_ref: delivery_ref.clone(),
            had_cover: upload.cover.is_some(),
        });
        Ok(delivery_ref)
    }

    async fn deliver_cached(&self, _owner_id: OwnerId, delivery_ref: &str) -> Result<CachedDelivery> {
        if self.stale.lock().contains(delivery_ref) {
            return Ok(CachedDelivery::Stale);
        }
        self.resent.lock().push(delivery_ref.to_string());
        Ok(CachedDelivery::Delivered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Opened { handle: String, text: String },
    Emitted { handle: String, text: String, activity: Activity },
    Closed { handle: String },
    Notified { handle: String, text: String },
}

/// Status surface that records every call.
#[derive(Default)]
pub struct FakeStatus {
    events: Mutex<Vec<StatusEvent>>,
    next_handle: AtomicUsize,
    refuse_open: AtomicBool,
}

impl FakeStatus {
    /// Make opening status messages fail, as when the chat blocked the bot.
    pub fn refuse_open(&self) {
        self.refuse_open.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Notified { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn emitted(&self) -> Vec<(String, Activity)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Emitted { text, activity, .. } => Some((text.clone(), *activity)),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Opened { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn context(&self, owner_id: OwnerId) -> StatusContext {
        let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
        StatusContext {
            owner_id,
            handle: n.to_string(),
        }
    }
}

#[async_trait]
impl StatusSurface for FakeStatus {
    async fn open(
        &self,
        owner_id: OwnerId,
        text: &str,
    ) -> std::result::Result<StatusContext, StatusError> {
        if self.refuse_open.load(Ordering::SeqCst) {
            return Err(StatusError::Transport("Forbidden: bot was blocked by the user".into()));
        }
        let ctx = self.context(owner_id);
        self.events.lock().push(StatusEvent::Opened {
            handle: ctx.handle.clone(),
            text: text.to_string(),
        });
        Ok(ctx)
    }

    async fn emit_status(
        &self,
        ctx: &StatusContext,
        text: &str,
        activity: Activity,
    ) -> std::result::Result<(), StatusError> {
        self.events.lock().push(StatusEvent::Emitted {
            handle: ctx.handle.clone(),
            text: text.to_string(),
            activity,
        });
        Ok(())
    }

    async fn close(&self, ctx: &StatusContext) -> std::result::Result<(), StatusError> {
        self.events.lock().push(StatusEvent::Closed {
            handle: ctx.handle.clone(),
        });
        Ok(())
    }

    async fn notify(
        &self,
        owner_id: OwnerId,
        text: &str,
    ) -> std::result::Result<StatusContext, StatusError> {
        let ctx = self.context(owner_id);
        self.events.lock().push(StatusEvent::Notified {
            handle: ctx.handle.clone(),
            text: text.to_string(),
        });
        Ok(ctx)
    }
}

/// Cache store over a map.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn seed(&self, content_id: &str, delivery_ref: &str) {
        self.entries
            .lock()
            .insert(content_id.to_string(), delivery_ref.to_string());
    }

    pub fn get(&self, content_id: &str) -> Option<String> {
        self.entries.lock().get(content_id).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn lookup(&self, content_id: &str) -> Result<Option<String>> {
        Ok(self.get(content_id))
    }

    async fn store(&self, content_id: &str, delivery_ref: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.seed(content_id, delivery_ref);
        Ok(())
    }

    async fn evict(&self, content_id: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(content_id).is_some())
    }
}

#[derive(Default)]
pub struct MemoryUsage {
    uses: Mutex<Vec<OwnerId>>,
}

#[async_trait]
impl UsageStore for MemoryUsage {
    async fn record_use(&self, owner_id: OwnerId) -> Result<()> {
        self.uses.lock().push(owner_id);
        Ok(())
    }

    async fn snapshot(&self) -> Result<UsageStats> {
        let uses = self.uses.lock();
        let distinct: HashSet<&OwnerId> = uses.iter().collect();
        Ok(UsageStats {
            total_uses: uses.len() as u64,
            distinct_users: distinct.len() as u64,
        })
    }
}

/// An engine wired to fakes, with fast ticks and a private download directory.
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub tagger: Arc<FakeTagger>,
    pub delivery: Arc<FakeDelivery>,
    pub status: Arc<FakeStatus>,
    pub cache: Arc<MemoryCache>,
    pub usage: Arc<MemoryUsage>,
    pub engine: Arc<DeliveryEngine>,
    pub dispatcher: Dispatcher,
    pub download_dir: PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = EngineConfig {
            tick_interval_ms: 10,
            notice_ttl_secs: 0,
            cancel_notice_ttl_secs: 0,
            summary_ttl_secs: 0,
            download_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        adjust(&mut config);

        let source = Arc::new(FakeSource::default());
        let tagger = Arc::new(FakeTagger::default());
        let delivery = Arc::new(FakeDelivery::default());
        let status = Arc::new(FakeStatus::default());
        let cache = Arc::new(MemoryCache::default());
        let usage = Arc::new(MemoryUsage::default());

        let engine = Arc::new(DeliveryEngine::new(
            config,
            EngineCollaborators {
                pipeline: PipelineDeps {
                    source: source.clone(),
                    tagger: tagger.clone(),
                    delivery: delivery.clone(),
                    cache: cache.clone(),
                },
                status: status.clone(),
            },
        ));
        let dispatcher = Dispatcher::new(engine.clone(), usage.clone());

        Self {
            source,
            tagger,
            delivery,
            status,
            cache,
            usage,
            engine,
            dispatcher,
            download_dir: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    /// Files and directories left behind in the download directory.
    pub fn leftover_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
                if path.is_dir() {
                    walk(&path, found);
                }
                found.push(path);
            }
        }

        let mut found = Vec::new();
        walk(&self.download_dir, &mut found);
        found
    }
}
