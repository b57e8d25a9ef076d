//! Reads backend values by response key.
//!
//! Sub-queries forward the caller's aliases, so a backend answers `renamed: fieldX`
//! under `renamed`. Backends that ignore aliases answer under `fieldX` instead; the
//! lookup falls back to the field name only when the response key is absent.

use serde_json::{Map, Value};

pub fn resolve_field<'a>(response_key: &str, field_name: &str, raw: &'a Map<String, Value>) -> Option<&'a Value> {
    raw.get(response_key).or_else(|| {
        if response_key == field_name {
            None
        } else {
            raw.get(field_name)
        }
    })
}
