//! Canonical JSON: sorted keys, compact separators, UTF-8. Signatures are
//! computed over exactly these bytes so two callers that build the same
//! logical payload always sign the same wire form.

use serde_json::{Map, Value};

use crate::error::SignError;

/// Serialize a JSON object to its canonical byte form.
///
/// `serde_json::Map` is BTreeMap-backed by default (no `preserve_order`
/// feature enabled here), so `serde_json::to_vec` already emits keys in
/// sorted order with no extraneous whitespace — exactly the canonical form.
pub fn canonical_json_bytes(payload: &Map<String, Value>) -> Result<Vec<u8>, SignError> {
    serde_json::to_vec(&Value::Object(payload.clone())).map_err(|_| SignError::NotAnObject)
}
