//! Request coordination: lookup, deduplicated fetch, decode, fan-out.
//!
//! A request flows memory, then disk, then network. Every bookkeeping
//! mutation (pending lookups, the in-flight fetch registry, the failure
//! blacklist) happens on one spawned coordination task fed by a command
//! channel, so none of it needs fine-grained locking. Blocking stages
//! (disk reads, fetches, decodes) run on worker tasks and report back as
//! commands; fetches are additionally bounded by a semaphore.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, CachedImage, Request, Resource};
use crate::domain::ports::{
    CacheResult, FetchEvent, FetchListener, FetchedPayload, ImageCachePort, ListenerId,
    RemoteFetchPort,
};
use crate::infrastructure::cache::{CacheStats, DiskStore, MemoryImageCache};
use crate::infrastructure::config::LoaderConfig;
use crate::infrastructure::decode;
use crate::infrastructure::fetch::HttpFetcher;

/// Orchestrates image loading from memory, disk, and network.
///
/// Construct one at startup and hand it to whatever triggers requests;
/// entry points never block the caller, and every accepted request
/// resolves to exactly one [`FetchEvent`] on its listener's channel
/// (or none after cancellation).
pub struct ImageLoader {
    command_tx: mpsc::UnboundedSender<Command>,
    memory_cache: Arc<MemoryImageCache>,
    disk_store: Option<Arc<DiskStore>>,
    failed_urls: Arc<RwLock<HashSet<String>>>,
    config: LoaderConfig,
}

enum Command {
    Download(Request),
    Cancel(ListenerId),
    LookupDone {
        request: Request,
        found: Option<Arc<CachedImage>>,
    },
    FetchDone {
        url: String,
        outcome: CacheResult<FetchedPayload>,
    },
    DecodeDone {
        url: String,
        image: Option<Arc<CachedImage>>,
    },
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Opens a loader: builds the HTTP transport, opens the disk store,
    /// and spawns the coordination task.
    ///
    /// A disk store that fails to open is logged and left out; the loader
    /// then runs memory+network only.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub async fn open(config: LoaderConfig) -> CacheResult<Self> {
        let fetch_port: Arc<dyn RemoteFetchPort> = Arc::new(HttpFetcher::new(config.timeout())?);
        let disk_store = match DiskStore::open(
            config.effective_disk_dir(),
            config.disk_version,
            config.disk_budget_bytes,
        )
        .await
        {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Disk store unavailable, continuing without it");
                None
            }
        };
        Ok(Self::with_parts(config, fetch_port, disk_store))
    }

    /// Assembles a loader from parts: the seam for a custom transport or
    /// a pre-opened store.
    #[must_use]
    pub fn with_parts(
        config: LoaderConfig,
        fetch_port: Arc<dyn RemoteFetchPort>,
        disk_store: Option<Arc<DiskStore>>,
    ) -> Self {
        let memory_cache = Arc::new(MemoryImageCache::new(config.memory_budget_bytes));
        let failed_urls = Arc::new(RwLock::new(HashSet::new()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator {
            memory_cache: memory_cache.clone(),
            disk_store: disk_store.clone(),
            fetch_port,
            failed_urls: failed_urls.clone(),
            command_tx: command_tx.clone(),
            fetch_semaphore: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            pending_lookups: HashMap::new(),
            inflight: HashMap::new(),
        };
        tokio::spawn(coordinator.run(command_rx));

        Self {
            command_tx,
            memory_cache,
            disk_store,
            failed_urls,
            config,
        }
    }

    /// Requests an image by URL.
    ///
    /// No-op when the identifier is empty or the URL previously failed.
    /// `max_width == max_height == 0` requests the image unresized.
    pub fn download(
        &self,
        identifier: &str,
        max_width: u32,
        max_height: u32,
        listener: &FetchListener,
    ) {
        self.download_resource(Resource::new(identifier), max_width, max_height, listener);
    }

    /// Requests an image by URL without size constraints.
    pub fn download_unconstrained(&self, identifier: &str, listener: &FetchListener) {
        self.download(identifier, 0, 0, listener);
    }

    /// Requests a resource, honoring its custom cache-key prefix.
    pub fn download_resource(
        &self,
        resource: Resource,
        max_width: u32,
        max_height: u32,
        listener: &FetchListener,
    ) {
        if resource.url().is_empty() {
            return;
        }
        if self.failed_urls.read().contains(resource.url()) {
            debug!(url = %resource.url(), "Skipping download of previously failed URL");
            return;
        }

        let request = Request::new(resource, max_width, max_height, listener.clone());

        // A memory hit is delivered on the caller's context, no async hop.
        if let Some(image) = self.memory_cache.get(&request.cache_key()) {
            deliver_success(&request, image);
            return;
        }

        if self.command_tx.send(Command::Download(request)).is_err() {
            warn!("Coordinator task is gone, dropping download request");
        }
    }

    /// Cancels every outstanding request of a listener.
    ///
    /// A fetch left with no remaining waiters is aborted, so abandoned
    /// requests cost no network traffic.
    pub fn cancel(&self, listener: &FetchListener) {
        if self.command_tx.send(Command::Cancel(listener.id())).is_err() {
            warn!("Coordinator task is gone, dropping cancel request");
        }
    }

    /// Clears the failure blacklist so failed URLs may be fetched again.
    pub fn clear_failures(&self) {
        let count = {
            let mut failed = self.failed_urls.write();
            let count = failed.len();
            failed.clear();
            count
        };
        if count > 0 {
            info!(count, "Cleared failure blacklist");
        }
    }

    /// Evicts the memory cache and clears the disk store.
    ///
    /// # Errors
    /// Returns an error if the disk store cannot be cleared.
    pub async fn clear_caches(&self) -> CacheResult<()> {
        self.memory_cache.clear();
        if let Some(store) = &self.disk_store {
            store.clear().await?;
        }
        info!("Cleared all image caches");
        Ok(())
    }

    /// Memory cache statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory_cache.stats()
    }

    /// Disk usage in bytes, `None` while the store is unavailable.
    #[must_use]
    pub fn disk_size(&self) -> Option<u64> {
        self.disk_store.as_ref().map(|store| store.size())
    }

    /// The loader's configuration.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

/// One deduplicated in-flight retrieval and its attached waiters.
///
/// The originating request's constraints drive the decode and its key
/// drives the store; waiters are notified in registration order.
struct InflightFetch {
    cancelled: Arc<AtomicBool>,
    origin: Request,
    waiters: Vec<Request>,
}

/// State owned by the coordination task. Every mutation happens on that
/// task, serialized by the command channel.
struct Coordinator {
    memory_cache: Arc<MemoryImageCache>,
    disk_store: Option<Arc<DiskStore>>,
    fetch_port: Arc<dyn RemoteFetchPort>,
    failed_urls: Arc<RwLock<HashSet<String>>>,
    command_tx: mpsc::UnboundedSender<Command>,
    fetch_semaphore: Arc<Semaphore>,
    pending_lookups: HashMap<ListenerId, Vec<String>>,
    inflight: HashMap<String, InflightFetch>,
}

impl Coordinator {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                Command::Download(request) => self.handle_download(request),
                Command::Cancel(listener) => self.handle_cancel(listener),
                Command::LookupDone { request, found } => self.handle_lookup_done(request, found),
                Command::FetchDone { url, outcome } => self.handle_fetch_done(url, outcome),
                Command::DecodeDone { url, image } => self.handle_decode_done(url, image),
            }
        }
        debug!("Coordinator task stopped");
    }

    fn handle_download(&mut self, request: Request) {
        // Memory may have filled between the caller's check and now.
        if let Some(image) = self.memory_cache.get(&request.cache_key()) {
            deliver_success(&request, image);
            return;
        }

        self.pending_lookups
            .entry(request.listener().id())
            .or_default()
            .push(request.url().to_owned());

        match &self.disk_store {
            Some(store) => {
                let store = store.clone();
                let tx = self.command_tx.clone();
                tokio::spawn(async move {
                    let key = request.cache_key();
                    let found = match store.lookup(&key).await {
                        Some(snapshot) => decode::from_snapshot(snapshot).await.map(Arc::new),
                        None => None,
                    };
                    let _ = tx.send(Command::LookupDone { request, found });
                });
            }
            None => self.handle_lookup_done(request, None),
        }
    }

    fn handle_lookup_done(&mut self, request: Request, found: Option<Arc<CachedImage>>) {
        if !self.take_pending_lookup(&request) {
            trace!(url = %request.url(), "Lookup finished after cancellation");
            return;
        }

        match found {
            Some(image) => {
                // Promote the disk hit so the next lookup stays in memory.
                self.memory_cache.put(request.cache_key(), image.clone());
                deliver_success(&request, image);
            }
            None => self.attach_fetch(request),
        }
    }

    /// Removes one pending-lookup entry; `false` means the request was
    /// cancelled while its lookup ran.
    fn take_pending_lookup(&mut self, request: &Request) -> bool {
        let id = request.listener().id();
        let Some(pending) = self.pending_lookups.get_mut(&id) else {
            return false;
        };
        let Some(pos) = pending.iter().position(|url| url == request.url()) else {
            return false;
        };
        pending.remove(pos);
        if pending.is_empty() {
            self.pending_lookups.remove(&id);
        }
        true
    }

    /// Attaches a request to its URL's in-flight fetch, starting one when
    /// none exists; concurrent requests for one URL share one retrieval.
    fn attach_fetch(&mut self, request: Request) {
        let url = request.url().to_owned();
        if let Some(inflight) = self.inflight.get_mut(&url) {
            trace!(url = %url, waiters = inflight.waiters.len() + 1, "Joining in-flight fetch");
            inflight.waiters.push(request);
            return;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let fetch_port = self.fetch_port.clone();
        let tx = self.command_tx.clone();
        let semaphore = self.fetch_semaphore.clone();
        let flag = cancelled.clone();
        let task_url = url.clone();
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if flag.load(Ordering::Acquire) {
                return;
            }
            let outcome = fetch_port.fetch(&task_url).await;
            if flag.load(Ordering::Acquire) {
                trace!(url = %task_url, "Fetch finished after cancellation, discarding");
                return;
            }
            let _ = tx.send(Command::FetchDone {
                url: task_url,
                outcome,
            });
        });

        self.inflight.insert(
            url,
            InflightFetch {
                cancelled,
                origin: request.clone(),
                waiters: vec![request],
            },
        );
    }

    fn handle_fetch_done(&mut self, url: String, outcome: CacheResult<FetchedPayload>) {
        let Some(inflight) = self.inflight.get(&url) else {
            trace!(url = %url, "Fetch completion for a cancelled retrieval");
            return;
        };

        match outcome {
            Ok(payload) => {
                let origin = inflight.origin.clone();
                let flag = inflight.cancelled.clone();
                let memory_cache = self.memory_cache.clone();
                let disk_store = self.disk_store.clone();
                let tx = self.command_tx.clone();
                tokio::spawn(async move {
                    let image = match decode::decode_payload(
                        payload,
                        origin.max_width(),
                        origin.max_height(),
                    )
                    .await
                    {
                        Ok(image) => Some(Arc::new(image)),
                        Err(e) => {
                            warn!(url = %origin.url(), error = %e, "Decode failed");
                            None
                        }
                    };

                    if let Some(image) = &image
                        && !flag.load(Ordering::Acquire)
                    {
                        let key = origin.cache_key();
                        memory_cache.put(key.clone(), image.clone());
                        if let Some(store) = &disk_store {
                            store_to_disk(store, &key, image).await;
                        }
                    }

                    let _ = tx.send(Command::DecodeDone { url, image });
                });
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Fetch failed");
                self.fail_fetch(&url);
            }
        }
    }

    fn handle_decode_done(&mut self, url: String, image: Option<Arc<CachedImage>>) {
        let Some(inflight) = self.inflight.remove(&url) else {
            trace!(url = %url, "Decode completion for a cancelled retrieval");
            return;
        };

        match image {
            Some(image) => {
                debug!(url = %url, waiters = inflight.waiters.len(), "Image loaded");
                for waiter in &inflight.waiters {
                    deliver_success(waiter, image.clone());
                }
            }
            None => self.fail_waiters(&url, &inflight),
        }
    }

    fn fail_fetch(&mut self, url: &str) {
        if let Some(inflight) = self.inflight.remove(url) {
            self.fail_waiters(url, &inflight);
        }
    }

    /// Notifies every waiter of failure, in registration order, exactly
    /// once each, and blacklists the URL.
    fn fail_waiters(&mut self, url: &str, inflight: &InflightFetch) {
        for waiter in &inflight.waiters {
            deliver_failure(waiter);
        }
        self.failed_urls.write().insert(url.to_owned());
        debug!(url = %url, waiters = inflight.waiters.len(), "Fetch failed, URL blacklisted");
    }

    fn handle_cancel(&mut self, listener: ListenerId) {
        let dropped_lookups = self
            .pending_lookups
            .remove(&listener)
            .map_or(0, |urls| urls.len());

        let mut dropped_waiters = 0usize;
        let mut abandoned: Vec<String> = Vec::new();
        for (url, inflight) in &mut self.inflight {
            let before = inflight.waiters.len();
            inflight
                .waiters
                .retain(|request| request.listener().id() != listener);
            dropped_waiters += before - inflight.waiters.len();
            if inflight.waiters.is_empty() {
                abandoned.push(url.clone());
            }
        }
        for url in abandoned {
            if let Some(inflight) = self.inflight.remove(&url) {
                inflight.cancelled.store(true, Ordering::Release);
                debug!(url = %url, "Cancelled fetch with no remaining waiters");
            }
        }

        if dropped_lookups > 0 || dropped_waiters > 0 {
            debug!(listener = %listener, dropped_lookups, dropped_waiters, "Cancelled listener requests");
        }
    }
}

fn deliver_success(request: &Request, image: Arc<CachedImage>) {
    request.listener().notify(FetchEvent::Loaded {
        identifier: request.url().to_owned(),
        image,
    });
}

fn deliver_failure(request: &Request) {
    request.listener().notify(FetchEvent::Failed {
        identifier: request.url().to_owned(),
    });
}

/// Persists a decoded image. The disk tier is best effort; failures are
/// logged and the entry is simply absent next time.
async fn store_to_disk(store: &DiskStore, key: &CacheKey, image: &CachedImage) {
    let (kind, payload) = match decode::disk_slots(image) {
        Ok(slots) => slots,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to encode disk entry");
            return;
        }
    };
    let Some(mut editor) = store.edit(key) else {
        trace!(key = %key, "Disk entry already being written");
        return;
    };
    editor.set_marker(kind);
    editor.set_payload(payload);
    if let Err(e) = editor.commit().await {
        warn!(key = %key, error = %e, "Failed to write disk entry");
    }
}
