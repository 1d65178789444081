use crate::insight_core::error::StoreError;
use crate::insight_core::store::KeyValueStore;
use tracing::debug;

/// Store key of the persisted thread id.
pub const THREAD_ID_KEY: &str = "portfolio_insights_thread_id";

/// The rotating session/thread identifier sent with stream requests and used
/// as the cache key. Read once at construction, written on every change.
pub struct ThreadIdentity<S> {
    store: S,
    current: String,
}

impl<S: KeyValueStore> ThreadIdentity<S> {
    pub fn load(store: S) -> Result<Self, StoreError> {
        let current = match store.get(THREAD_ID_KEY)? {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                let id = new_thread_id();
                store.set(THREAD_ID_KEY, &id)?;
                debug!(target: "insight_stream::identity", thread_id = %id, "created thread id");
                id
            }
        };
        Ok(Self { store, current })
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Replace the thread id, e.g. when the user forces a refresh.
    pub fn rotate(&mut self) -> Result<&str, StoreError> {
        let id = new_thread_id();
        self.store.set(THREAD_ID_KEY, &id)?;
        debug!(
            target: "insight_stream::identity",
            previous = %self.current,
            thread_id = %id,
            "rotated thread id"
        );
        self.current = id;
        Ok(&self.current)
    }
}

fn new_thread_id() -> String {
    format!("insights-{}", uuid::Uuid::new_v4())
}
