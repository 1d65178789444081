use crate::insight_core::clock::{Clock, SystemClock};
use crate::insight_core::error::InsightError;
use crate::insight_core::store::KeyValueStore;
use crate::insight_core::transport::HttpTransport;
use crate::insight_types::{InsightRequest, InsightsResult};
use crate::insights::cache::ResultCache;
use crate::insights::config::InsightStreamConfig;
use crate::insights::identity::ThreadIdentity;
use crate::insights::session::{SessionHandle, StreamSession};
use std::sync::Arc;
use tracing::debug;

/// Result of [`InsightsClient::load`].
pub enum InsightLoad {
    /// A fresh-enough result was cached for the current thread.
    Cached(InsightsResult),
    Streaming(StreamSession),
}

/// Caller-facing entry point: single-flight streaming plus the result cache
/// and persisted thread identity.
pub struct InsightsClient<T, S> {
    transport: Arc<T>,
    config: InsightStreamConfig,
    cache: ResultCache<Arc<S>>,
    identity: ThreadIdentity<Arc<S>>,
    active: Option<SessionHandle>,
}

impl<T, S> InsightsClient<T, S>
where
    T: HttpTransport + 'static,
    S: KeyValueStore + 'static,
{
    pub fn new(transport: T, config: InsightStreamConfig, store: Arc<S>) -> Result<Self, InsightError> {
        Self::with_clock(transport, config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: T,
        config: InsightStreamConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InsightError> {
        let cache = ResultCache::with_clock(store.clone(), config.cache_ttl, clock);
        Ok(Self {
            transport: Arc::new(transport),
            config,
            cache,
            identity: ThreadIdentity::load(store)?,
            active: None,
        })
    }

    pub fn thread_id(&self) -> &str {
        self.identity.current()
    }

    pub fn cache(&self) -> &ResultCache<Arc<S>> {
        &self.cache
    }

    /// Serve the cached result for the current thread, or start streaming.
    pub fn load(&mut self, query: impl Into<String>) -> InsightLoad {
        let thread_id = self.identity.current().to_string();
        if let Some(result) = self.cache.get(&thread_id) {
            debug!(target: "insight_stream::client", %thread_id, "serving cached insights");
            return InsightLoad::Cached(result);
        }
        InsightLoad::Streaming(self.start_stream(query, Some(thread_id)))
    }

    /// Start a new stream. Any session this client started before is cancelled first.
    pub fn start_stream(&mut self, query: impl Into<String>, thread_id: Option<String>) -> StreamSession {
        self.cancel_stream();
        let thread_id = thread_id.unwrap_or_else(|| self.identity.current().to_string());
        let request = InsightRequest::new(query).with_thread_id(thread_id);
        let session = StreamSession::open(self.transport.clone(), &self.config, request);
        self.active = Some(session.handle());
        session
    }

    pub fn cancel_stream(&mut self) {
        if let Some(handle) = self.active.take() {
            if !handle.is_cancelled() {
                debug!(target: "insight_stream::client", "cancelling previous insight stream");
            }
            handle.cancel();
        }
    }

    /// Persist a completed result under `thread_id`.
    pub fn remember(&self, thread_id: &str, result: &InsightsResult) -> Result<(), InsightError> {
        self.cache.put(thread_id, result)
    }

    /// Forget the cached result and rotate to a fresh thread id, so the next
    /// `load` streams again. Returns the new thread id.
    pub fn clear_cached_result(&mut self) -> Result<String, InsightError> {
        self.cache.clear(self.identity.current())?;
        Ok(self.identity.rotate()?.to_string())
    }
}
