#[path = "../crates/insight-types/src/lib.rs"]
pub mod types;
#[path = "../crates/core/src/lib.rs"]
pub mod core;
#[path = "../crates/streaming-sse/src/lib.rs"]
pub mod streaming_sse;
#[cfg(feature = "reqwest")]
#[path = "../crates/transports/reqwest/src/lib.rs"]
pub mod transport_reqwest;
#[path = "../crates/insights/src/lib.rs"]
pub mod insights;

#[cfg(feature = "reqwest")]
pub mod transports {
    pub use crate::transport_reqwest as reqwest;
}

pub(crate) use crate::core as insight_core;
pub(crate) use crate::streaming_sse as insight_sse;
pub(crate) use crate::types as insight_types;
