//! Client side of the portfolio insight stream: event normalization, progress
//! and per-position state, streaming sessions, and the result cache.

pub mod cache;
pub mod client;
pub mod config;
pub mod identity;
pub mod normalize;
pub mod pipeline_tracker;
pub mod progress;
pub mod session;

pub use cache::{CacheEntry, ResultCache, CACHE_KEY_PREFIX};
pub use client::{InsightLoad, InsightsClient};
pub use config::{InsightStreamConfig, DEFAULT_CACHE_TTL, DEFAULT_IDLE_TIMEOUT};
pub use identity::{ThreadIdentity, THREAD_ID_KEY};
pub use normalize::{EventNormalizer, ShapeRule, SHAPE_RULES};
pub use pipeline_tracker::{PipelineEntry, PipelineSnapshot, PipelineStateTracker};
pub use progress::{Applied, Outcome, ProgressSnapshot, ProgressStateMachine, Step};
pub use session::{
    EventStream, SessionHandle, SessionOutcome, SessionStatus, SessionUpdate, StreamSession,
    StreamSnapshot,
};

#[cfg(test)]
#[path = "../tests/normalize_tests.rs"]
mod normalize_tests;

#[cfg(test)]
#[path = "../tests/tracker_tests.rs"]
mod tracker_tests;

#[cfg(test)]
#[path = "../tests/progress_tests.rs"]
mod progress_tests;

#[cfg(test)]
#[path = "../tests/session_tests.rs"]
mod session_tests;

#[cfg(test)]
#[path = "../tests/cache_tests.rs"]
mod cache_tests;
