//! Chunk store and range server for large objects
//!
//! A large object is downloaded once in full, split into fixed-size chunks
//! and committed to the durable store: every chunk first, then the record.
//! Once AVAILABLE, any byte range is answered from the chunks covering it.
//!
//! Per-URL download state lives in an in-memory table owned by the store.
//! Every change goes through [`ChunkStore::transition`], which checks and
//! flips the state inside one short critical section. The flip to LOADING
//! happens before the first await of a download, so concurrent requests for
//! the same object can never start two downloads.

use crate::chunking::{
    assemble_range, chunk_key, chunks_for_range, record_key, split_chunks, url_from_record_key,
};
use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::models::{ByteRange, DownloadState, InterceptedRequest, LargeObjectRecord, ProxyResponse};
use crate::store::DurableStore;
use crate::transport::Transport;
use bytes::Bytes;
use http::{header, StatusCode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Content type used when the origin does not send one
pub const DEFAULT_CONTENT_TYPE: &str = "video/mp4";

/// Events driving the per-object download state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// UNKNOWN → LOADING
    Begin,
    /// LOADING → AVAILABLE
    Complete,
    /// LOADING → UNKNOWN
    Fail,
    /// AVAILABLE → UNKNOWN, a chunk was found missing
    Invalidate,
    /// UNKNOWN → AVAILABLE, a committed record was found at startup
    Restore,
    /// AVAILABLE | UNKNOWN → UNKNOWN, the object was deleted
    Evict,
}

/// Result of handling a large-object request
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Answered from stored chunks
    Served(ProxyResponse),
    /// Not answerable locally; default network handling takes over
    FallThrough,
}

enum RangeRead {
    Served(ProxyResponse),
    Missing(String),
}

/// Chunked large-object store
pub struct ChunkStore {
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    metrics: Arc<ProxyMetrics>,
    chunk_size: u64,
    states: Mutex<HashMap<String, DownloadState>>,
    /// Objects being removed; no download may begin for them
    removing: Mutex<HashSet<String>>,
}

impl ChunkStore {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        metrics: Arc<ProxyMetrics>,
        chunk_size: u64,
    ) -> Self {
        ChunkStore {
            store,
            transport,
            metrics,
            chunk_size,
            states: Mutex::new(HashMap::new()),
            removing: Mutex::new(HashSet::new()),
        }
    }

    /// Current download state of an object
    pub fn state(&self, url: &str) -> DownloadState {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(url).copied().unwrap_or(DownloadState::Unknown)
    }

    /// Apply `event` to the state of `url`
    ///
    /// Returns `true` when the transition was legal and applied, `false`
    /// when the current state does not accept the event (nothing changes).
    pub fn transition(&self, url: &str, event: StateEvent) -> bool {
        use DownloadState::*;

        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let current = states.get(url).copied().unwrap_or(Unknown);

        if matches!(event, StateEvent::Begin | StateEvent::Restore) && self.is_removing(url) {
            debug!("Ignoring {:?} for {}, removal in progress", event, url);
            return false;
        }

        let next = match (current, event) {
            (Unknown, StateEvent::Begin) => Loading,
            (Loading, StateEvent::Complete) => Available,
            (Loading, StateEvent::Fail) => Unknown,
            (Available, StateEvent::Invalidate) => Unknown,
            (Unknown, StateEvent::Restore) => Available,
            (Available | Unknown, StateEvent::Evict) => Unknown,
            _ => {
                debug!("Ignoring {:?} for {} in state {}", event, url, current);
                return false;
            }
        };

        if next == Unknown {
            states.remove(url);
        } else {
            states.insert(url.to_string(), next);
        }
        drop(states);

        if current != next {
            info!("Download state of {}: {} -> {} ({:?})", url, current, next, event);
        }
        true
    }

    /// Download and commit `url` unless it is already loading or available
    ///
    /// Returns `Ok(true)` when this call performed the download, `Ok(false)`
    /// when it was a no-op. On failure the state is back to UNKNOWN.
    pub async fn ensure_download(&self, url: &str) -> Result<bool> {
        if !self.transition(url, StateEvent::Begin) {
            return Ok(false);
        }
        self.download_loading(url).await.map(|_| true)
    }

    /// Start a background download of `url` if it is UNKNOWN
    ///
    /// The state flips to LOADING before this returns, so callers racing on
    /// the same URL spawn at most one task. The task runs to completion even
    /// when the request that triggered it goes away.
    pub fn spawn_download(self: &Arc<Self>, url: &str) -> Option<JoinHandle<()>> {
        if !self.transition(url, StateEvent::Begin) {
            return None;
        }

        let store = Arc::clone(self);
        let url = url.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = store.download_loading(&url).await {
                warn!("Background download of {} failed: {}", url, e);
            }
        }))
    }

    /// Run the download for an object already flipped to LOADING
    async fn download_loading(&self, url: &str) -> Result<LargeObjectRecord> {
        let mut guard = LoadingGuard::new(self, url);

        match self.acquire(url).await {
            Ok(record) => {
                guard.settle(StateEvent::Complete);
                self.metrics.record_chunk_download(true);
                info!(
                    "Stored {} ({} bytes in {} chunks)",
                    url, record.total_size, record.chunk_count
                );
                Ok(record)
            }
            Err(e) => {
                guard.settle(StateEvent::Fail);
                self.metrics.record_chunk_download(false);
                error!("Failed to acquire {}: {}", url, e);
                Err(e)
            }
        }
    }

    /// Fetch the full object and commit chunks then record
    async fn acquire(&self, url: &str) -> Result<LargeObjectRecord> {
        let response = self.transport.send(&InterceptedRequest::get(url)).await?;

        if !response.status.is_success() || response.status == StatusCode::PARTIAL_CONTENT {
            return Err(ProxyError::from_http_status(
                response.status.as_u16(),
                format!("full object fetch of {}", url),
            ));
        }
        if response.body.is_empty() {
            return Err(ProxyError::ParseError(format!(
                "origin returned an empty body for {}",
                url
            )));
        }

        let content_type = response
            .header(header::CONTENT_TYPE.as_str())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let record = LargeObjectRecord::new(
            url,
            response.body.len() as u64,
            self.chunk_size,
            content_type,
        );

        for (index, chunk) in split_chunks(&response.body, self.chunk_size)
            .into_iter()
            .enumerate()
        {
            let key = chunk_key(url, index as u64);
            let len = chunk.len();
            self.store.set(&key, chunk).await?;
            debug!("Wrote chunk {} of {} ({} bytes)", index, url, len);
        }

        let encoded = bincode::serialize(&record)?;
        self.store.set(&record_key(url), Bytes::from(encoded)).await?;

        Ok(record)
    }

    /// Read the committed record of an object
    pub async fn load_record(&self, url: &str) -> Result<Option<LargeObjectRecord>> {
        match self.store.get(&record_key(url)).await? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Answer a large-object GET
    ///
    /// - AVAILABLE: serve the requested range from chunks; a missing chunk
    ///   demotes the object, re-triggers acquisition and falls through
    /// - UNKNOWN: start an acquisition and fall through
    /// - LOADING: fall through
    pub async fn handle(self: &Arc<Self>, request: &InterceptedRequest) -> Result<ChunkOutcome> {
        let url = request.url.as_str();

        match self.state(url) {
            DownloadState::Available => {
                let range_header = request.header(header::RANGE.as_str());
                match self.serve_range(url, range_header).await? {
                    RangeRead::Served(response) => Ok(ChunkOutcome::Served(response)),
                    RangeRead::Missing(detail) => {
                        let inconsistency = ProxyError::StateInconsistency {
                            url: url.to_string(),
                            detail,
                        };
                        warn!("{}, re-acquiring", inconsistency);
                        self.transition(url, StateEvent::Invalidate);
                        self.spawn_download(url);
                        self.metrics.record_range_fallback();
                        Ok(ChunkOutcome::FallThrough)
                    }
                }
            }
            DownloadState::Loading => {
                debug!("{} is loading, falling through to network", url);
                Ok(ChunkOutcome::FallThrough)
            }
            DownloadState::Unknown => {
                debug!("{} is not stored, starting acquisition", url);
                self.spawn_download(url);
                Ok(ChunkOutcome::FallThrough)
            }
        }
    }

    /// Build the range response for an AVAILABLE object
    async fn serve_range(&self, url: &str, range_header: Option<&str>) -> Result<RangeRead> {
        let record = match self.load_record(url).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(RangeRead::Missing("record missing".to_string())),
            Err(e) => return Ok(RangeRead::Missing(format!("record unreadable: {}", e))),
        };

        let range = match ByteRange::resolve(range_header.or(Some("bytes 0-")), record.total_size) {
            Ok(range) => range,
            Err(ProxyError::UnsatisfiableRange(detail)) => {
                debug!("Unsatisfiable range for {}: {}", url, detail);
                self.metrics.record_unsatisfiable_range();
                let response = ProxyResponse::new(StatusCode::RANGE_NOT_SATISFIABLE, Bytes::new())
                    .with_header(header::CONTENT_RANGE, &format!("bytes */{}", record.total_size))
                    .with_header(header::CONTENT_LENGTH, "0");
                return Ok(RangeRead::Served(response));
            }
            Err(e) => return Err(e),
        };

        let chunks = match self.read_chunks(&record, &range).await {
            Ok(chunks) => chunks,
            Err(detail) => return Ok(RangeRead::Missing(detail)),
        };
        let body = match assemble_range(&record, &range, &chunks) {
            Ok(body) => body,
            Err(e) => return Ok(RangeRead::Missing(e.to_string())),
        };

        self.metrics.record_range_response(body.len() as u64);
        let response = ProxyResponse::new(StatusCode::PARTIAL_CONTENT, body)
            .with_header(header::CONTENT_TYPE, &record.content_type)
            .with_header(header::CONTENT_LENGTH, &range.size().to_string())
            .with_header(header::CONTENT_RANGE, &range.to_content_range(record.total_size))
            .with_header(header::ACCEPT_RANGES, "bytes");
        Ok(RangeRead::Served(response))
    }

    /// Fetch the chunks covering `range` in parallel
    ///
    /// Any missing or unreadable chunk fails the whole read.
    async fn read_chunks(
        &self,
        record: &LargeObjectRecord,
        range: &ByteRange,
    ) -> std::result::Result<BTreeMap<u64, Bytes>, String> {
        let mut reads = JoinSet::new();
        for index in chunks_for_range(record, range) {
            let store = Arc::clone(&self.store);
            let key = chunk_key(&record.url, index);
            reads.spawn(async move { (index, store.get(&key).await) });
        }

        let mut chunks = BTreeMap::new();
        while let Some(joined) = reads.join_next().await {
            match joined {
                Ok((index, Ok(Some(chunk)))) => {
                    chunks.insert(index, chunk);
                }
                Ok((index, Ok(None))) => {
                    reads.abort_all();
                    return Err(format!("chunk {} missing", index));
                }
                Ok((index, Err(e))) => {
                    reads.abort_all();
                    return Err(format!("chunk {} unreadable: {}", index, e));
                }
                Err(e) => {
                    reads.abort_all();
                    return Err(format!("chunk read task failed: {}", e));
                }
            }
        }
        Ok(chunks)
    }

    /// Rebuild the state table from committed records
    ///
    /// Returns the number of objects marked AVAILABLE.
    pub async fn restore(&self) -> Result<usize> {
        let mut restored = 0;
        for key in self.store.keys().await? {
            let Some(url) = url_from_record_key(&key) else {
                continue;
            };
            match self.load_record(url).await {
                Ok(Some(_)) => {
                    if self.transition(url, StateEvent::Restore) {
                        restored += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record for {}: {}", url, e),
            }
        }

        info!("Restored {} stored large objects", restored);
        Ok(restored)
    }

    fn is_removing(&self, url: &str) -> bool {
        let removing = self.removing.lock().unwrap_or_else(|e| e.into_inner());
        removing.contains(url)
    }

    /// Mark `url` as being removed unless it is loading or already being removed
    fn begin_removal<'a>(&'a self, url: &'a str) -> Result<RemovalGuard<'a>> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let detail = if states.get(url) == Some(&DownloadState::Loading) {
            Some("cannot remove an object while it is loading")
        } else {
            let mut removing = self.removing.lock().unwrap_or_else(|e| e.into_inner());
            if removing.insert(url.to_string()) {
                None
            } else {
                Some("object is already being removed")
            }
        };
        drop(states);

        match detail {
            Some(detail) => Err(ProxyError::StateInconsistency {
                url: url.to_string(),
                detail: detail.to_string(),
            }),
            None => Ok(RemovalGuard { store: self, url }),
        }
    }

    /// Delete an object: its record first, then every chunk
    ///
    /// Returns the number of chunks deleted. Objects that are still loading
    /// cannot be removed. No download of the object can begin until the
    /// removal has finished.
    pub async fn remove_object(&self, url: &str) -> Result<usize> {
        let _removal = self.begin_removal(url)?;

        self.store.delete(&record_key(url)).await?;

        let suffix = format!(":{}", url);
        let mut removed = 0;
        for key in self.store.keys().await? {
            let is_chunk = key
                .strip_prefix("chunk:")
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .is_some_and(|index| index.parse::<u64>().is_ok());
            if is_chunk {
                self.store.delete(&key).await?;
                removed += 1;
            }
        }

        self.transition(url, StateEvent::Evict);
        info!("Removed {} ({} chunks)", url, removed);
        Ok(removed)
    }
}

/// Clears the removal mark of an object when dropped
struct RemovalGuard<'a> {
    store: &'a ChunkStore,
    url: &'a str,
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        let mut removing = self.store.removing.lock().unwrap_or_else(|e| e.into_inner());
        removing.remove(self.url);
    }
}

/// Reverts a LOADING state if the download future is dropped before it settles
struct LoadingGuard<'a> {
    store: &'a ChunkStore,
    url: &'a str,
    settled: bool,
}

impl<'a> LoadingGuard<'a> {
    fn new(store: &'a ChunkStore, url: &'a str) -> Self {
        LoadingGuard {
            store,
            url,
            settled: false,
        }
    }

    fn settle(&mut self, event: StateEvent) {
        self.store.transition(self.url, event);
        self.settled = true;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Download of {} abandoned", self.url);
            self.store.transition(self.url, StateEvent::Fail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::HttpTransport;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHUNK: u64 = 64 * 1024;

    fn object(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn chunk_store(store: Arc<MemoryStore>) -> Arc<ChunkStore> {
        let transport =
            Arc::new(HttpTransport::new(Duration::from_secs(1), Duration::from_secs(10)).unwrap());
        Arc::new(ChunkStore::new(
            store,
            transport,
            Arc::new(ProxyMetrics::new().unwrap()),
            CHUNK,
        ))
    }

    fn offline_store() -> Arc<ChunkStore> {
        chunk_store(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_transition_table() {
        let store = offline_store();
        let url = "http://o/v.mp4";

        assert!(!store.transition(url, StateEvent::Complete));
        assert!(store.transition(url, StateEvent::Begin));
        assert_eq!(store.state(url), DownloadState::Loading);
        assert!(!store.transition(url, StateEvent::Begin));
        assert!(!store.transition(url, StateEvent::Evict));
        assert!(store.transition(url, StateEvent::Complete));
        assert_eq!(store.state(url), DownloadState::Available);
        assert!(!store.transition(url, StateEvent::Restore));
        assert!(store.transition(url, StateEvent::Invalidate));
        assert_eq!(store.state(url), DownloadState::Unknown);
    }

    #[test]
    fn test_fail_returns_to_unknown() {
        let store = offline_store();
        let url = "http://o/v.mp4";
        assert!(store.transition(url, StateEvent::Begin));
        assert!(store.transition(url, StateEvent::Fail));
        assert_eq!(store.state(url), DownloadState::Unknown);
        assert!(store.transition(url, StateEvent::Begin));
    }

    #[tokio::test]
    async fn test_ensure_download_commits_chunks_then_record() {
        let server = MockServer::start().await;
        let data = object(150_000);
        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let memory = Arc::new(MemoryStore::new());
        let store = chunk_store(Arc::clone(&memory));
        let url = format!("{}/v.mp4", server.uri());

        assert!(store.ensure_download(&url).await.unwrap());
        assert_eq!(store.state(&url), DownloadState::Available);

        let record = store.load_record(&url).await.unwrap().unwrap();
        assert_eq!(record.total_size, 150_000);
        assert_eq!(record.chunk_count, 3);
        assert_eq!(record.content_type, DEFAULT_CONTENT_TYPE);
        // 3 chunks + 1 record
        assert_eq!(memory.get_stats().writes, 4);

        // Second call is a no-op
        assert!(!store.ensure_download(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_partial_content_fails_acquisition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 10]))
            .mount(&server)
            .await;

        let store = offline_store();
        let url = format!("{}/v.mp4", server.uri());
        assert!(store.ensure_download(&url).await.is_err());
        assert_eq!(store.state(&url), DownloadState::Unknown);
    }

    #[tokio::test]
    async fn test_empty_body_fails_acquisition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = offline_store();
        let url = format!("{}/v.mp4", server.uri());
        assert!(matches!(
            store.ensure_download(&url).await,
            Err(ProxyError::ParseError(_))
        ));
        assert_eq!(store.state(&url), DownloadState::Unknown);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(object(1000)))
            .mount(&server)
            .await;

        let store = offline_store();
        let url = format!("{}/v.mp4", server.uri());
        store.ensure_download(&url).await.unwrap();

        let request = InterceptedRequest::get(&url).with_header(header::RANGE, "bytes=5000-");
        match store.handle(&request).await.unwrap() {
            ChunkOutcome::Served(response) => {
                assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
                assert_eq!(response.header("content-range"), Some("bytes */1000"));
            }
            ChunkOutcome::FallThrough => panic!("expected a 416 response"),
        }
    }

    #[tokio::test]
    async fn test_restore_and_remove_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(object(200_000)))
            .mount(&server)
            .await;

        let memory = Arc::new(MemoryStore::new());
        let url = format!("{}/v.mp4", server.uri());
        chunk_store(Arc::clone(&memory)).ensure_download(&url).await.unwrap();

        // A fresh store over the same durable data
        let restarted = chunk_store(Arc::clone(&memory));
        assert_eq!(restarted.state(&url), DownloadState::Unknown);
        assert_eq!(restarted.restore().await.unwrap(), 1);
        assert_eq!(restarted.state(&url), DownloadState::Available);

        assert_eq!(restarted.remove_object(&url).await.unwrap(), 4);
        assert_eq!(restarted.state(&url), DownloadState::Unknown);
        assert!(memory.is_empty());
    }

    /// Store that tries to begin a download of `url` each time a chunk is deleted
    struct RacingStore {
        inner: MemoryStore,
        chunk_store: OnceLock<Weak<ChunkStore>>,
        url: String,
        begins_attempted: AtomicUsize,
        begins_accepted: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DurableStore for RacingStore {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Bytes) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if key.starts_with("chunk:") {
                if let Some(chunk_store) = self.chunk_store.get().and_then(Weak::upgrade) {
                    self.begins_attempted.fetch_add(1, AtomicOrdering::SeqCst);
                    if chunk_store.transition(&self.url, StateEvent::Begin) {
                        self.begins_accepted.fetch_add(1, AtomicOrdering::SeqCst);
                    }
                }
            }
            self.inner.delete(key).await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn test_no_download_begins_during_removal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(object(200_000)))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/v.mp4", server.uri());
        let racing = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            chunk_store: OnceLock::new(),
            url: url.clone(),
            begins_attempted: AtomicUsize::new(0),
            begins_accepted: AtomicUsize::new(0),
        });
        let transport =
            Arc::new(HttpTransport::new(Duration::from_secs(1), Duration::from_secs(10)).unwrap());
        let store = Arc::new(ChunkStore::new(
            racing.clone(),
            transport,
            Arc::new(ProxyMetrics::new().unwrap()),
            CHUNK,
        ));
        assert!(racing.chunk_store.set(Arc::downgrade(&store)).is_ok());

        store.ensure_download(&url).await.unwrap();
        // UNKNOWN would normally accept Begin
        assert!(store.transition(&url, StateEvent::Invalidate));
        assert_eq!(store.remove_object(&url).await.unwrap(), 4);

        assert_eq!(racing.begins_attempted.load(AtomicOrdering::SeqCst), 4);
        assert_eq!(racing.begins_accepted.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(store.state(&url), DownloadState::Unknown);
        assert!(racing.inner.is_empty());

        // Once removed, the object can be acquired again
        assert!(store.transition(&url, StateEvent::Begin));
    }

    #[tokio::test]
    async fn test_remove_refused_while_loading() {
        let store = offline_store();
        let url = "http://o/v.mp4";
        assert!(store.transition(url, StateEvent::Begin));
        assert!(matches!(
            store.remove_object(url).await,
            Err(ProxyError::StateInconsistency { .. })
        ));

        // A refused removal leaves no mark behind
        assert!(store.transition(url, StateEvent::Fail));
        assert!(store.transition(url, StateEvent::Begin));
    }
}
