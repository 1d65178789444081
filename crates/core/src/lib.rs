pub mod clock;
pub mod error;
pub mod json;
pub mod store;
pub mod transport;

pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::error::{InsightError, StoreError, TransportError};
pub use crate::core::store::{FileStore, KeyValueStore, MemoryStore};
pub use crate::core::transport::{ByteStream, HttpTransport, TransportConfig};

#[cfg(test)]
#[path = "../tests/json_tests.rs"]
mod json_tests;
