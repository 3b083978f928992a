//! Shared data types for all storage backends

mod options;

pub use options::{CappedLimits, CollectionOptions};

use serde_json::{Map as JsonMap, Value as JsonValue};

/// One stored metric document (a JSON object, insertion ordered)
pub type Document = JsonMap<String, JsonValue>;
