//! Domain logic for metric persistence
//!
//! - `flush` - Flush event routing, connection caching and capped inserts

pub mod flush;

pub use flush::{FlushEvent, FlushPipeline, FlushSink};
