//! Collection capacity policy

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

/// Options a collection is created with
///
/// Held as a JSON object so operator-supplied keys pass through to the
/// backend untouched. The computed capped policy is `capped`, `size` and
/// `max`; configured extras are applied on top and win on key collision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionOptions(JsonMap<String, JsonValue>);

/// Validated limits extracted from [`CollectionOptions`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CappedLimits {
    /// Maximum total size in bytes, `None` when uncapped
    pub size: Option<u64>,
    /// Maximum document count, `None` when unbounded
    pub max: Option<u64>,
}

impl CappedLimits {
    pub fn is_capped(&self) -> bool {
        self.size.is_some()
    }
}

impl CollectionOptions {
    /// Capped policy of `document_size * max` bytes and `max` documents, with overrides
    pub fn capped(document_size: u64, max: u64, extra: &JsonMap<String, JsonValue>) -> Self {
        let mut options = JsonMap::new();
        options.insert("capped".to_string(), json!(true));
        options.insert("size".to_string(), json!(document_size.saturating_mul(max)));
        options.insert("max".to_string(), json!(max));
        for (key, value) in extra {
            options.insert(key.clone(), value.clone());
        }
        Self(options)
    }

    pub fn is_capped(&self) -> bool {
        self.0
            .get("capped")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    pub fn size(&self) -> Option<u64> {
        self.0.get("size").and_then(JsonValue::as_u64)
    }

    pub fn max(&self) -> Option<u64> {
        self.0.get("max").and_then(JsonValue::as_u64)
    }

    pub fn as_map(&self) -> &JsonMap<String, JsonValue> {
        &self.0
    }

    /// Validate the options and extract the limits a backend enforces
    pub fn limits(&self) -> Result<CappedLimits, String> {
        if let Some(capped) = self.0.get("capped")
            && !capped.is_boolean()
        {
            return Err(format!("'capped' must be a boolean, got {capped}"));
        }

        let max = match self.0.get("max") {
            None | Some(JsonValue::Null) => None,
            Some(value) => match value.as_u64() {
                Some(0) | None => {
                    return Err(format!("'max' must be a positive integer, got {value}"));
                }
                Some(max) => Some(max),
            },
        };

        if !self.is_capped() {
            return Ok(CappedLimits { size: None, max });
        }

        match self.0.get("size").and_then(JsonValue::as_u64) {
            Some(size) if size > 0 => Ok(CappedLimits {
                size: Some(size),
                max,
            }),
            _ => Err("capped collections require a positive integer 'size'".to_string()),
        }
    }
}

impl From<JsonMap<String, JsonValue>> for CollectionOptions {
    fn from(map: JsonMap<String, JsonValue>) -> Self {
        Self(map)
    }
}
