use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::native::QueryContext;

pub const DEFAULT_CHUNK_PERIOD: &str = "P1Y";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default context entries merged with caller overrides, key by key.
///
/// Overrides win; keys only present in the overrides are passed through.
pub fn build_context(chunk_period: &str, timeout_ms: u64, overrides: &QueryContext) -> QueryContext {
    let mut context = QueryContext::new();
    context.insert("queryId".into(), JsonValue::String(new_query_id()));
    context.insert("chunkPeriod".into(), JsonValue::String(chunk_period.to_string()));
    context.insert("timeout".into(), JsonValue::from(timeout_ms));

    for (key, value) in overrides {
        context.insert(key.clone(), value.clone());
    }
    context
}

/// Random version 4 UUID
pub fn new_query_id() -> String {
    Uuid::new_v4().to_string()
}
