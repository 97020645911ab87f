//! Response normalizer: reduces any operation result to the canonical
//! `{payload, status_code, headers}` envelope.
//!
//! Wrapped operations produce the closed [`RawResult`] sum type, so most of
//! the historical shape-detection lives in [`unwrap_value`], which also
//! repairs the legacy `[payload, status]` arrays still present in old durable
//! rows. Normalization is idempotent and never fails: unrecognized shapes
//! pass through unchanged with status 200.

use crate::record::Envelope;
use serde_json::Value;
use std::collections::BTreeMap;

/// Result shape a wrapped operation may return.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    /// Already canonical.
    Envelope(Envelope),
    /// `(body, status)` pair.
    WithStatus(Value, u16),
    /// Bare payload; status defaults to 200.
    Json(Value),
}

/// Reduce a raw operation result to the canonical envelope.
pub fn normalize(raw: RawResult) -> Envelope {
    match raw {
        RawResult::Envelope(envelope) => {
            let headers = envelope.headers.clone();
            let (payload, status, _) =
                unwrap_value(envelope.payload, Some(envelope.status_code));
            finish(payload, status, headers)
        }
        RawResult::WithStatus(value, status) => {
            let (payload, status, _) = unwrap_value(value, Some(status));
            finish(payload, status, None)
        }
        RawResult::Json(value) => {
            let (payload, status, _) = unwrap_value(value, None);
            finish(payload, status, None)
        }
    }
}

/// Repair a payload read back from a store. Returns the canonical envelope
/// and whether anything changed (so the caller can persist the repair).
pub fn repair_stored(
    payload: Value,
    status_code: u16,
    headers: Option<BTreeMap<String, String>>,
) -> (Envelope, bool) {
    let stored_status = status_code;
    let (payload, status, payload_changed) = unwrap_value(payload, Some(status_code));
    let envelope = finish(payload, status, headers);
    let changed = payload_changed || envelope.status_code != stored_status;
    (envelope, changed)
}

fn finish(payload: Value, status: Option<u16>, headers: Option<BTreeMap<String, String>>) -> Envelope {
    Envelope {
        payload,
        status_code: status.unwrap_or(200),
        headers,
    }
}

/// Apply the unwrap pipeline until no rule matches. Rules, in order:
/// 1. mapping with a `response`/`data` field and a sibling integer status —
///    unwrap to the inner field, adopt the sibling status when still unset
/// 2. generic `{success, data}` envelope — unwrap to `data`
/// 3. legacy 2-element array with a trailing status integer — split; the
///    embedded status always wins (it is the one the buggy writer meant)
fn unwrap_value(mut value: Value, mut status: Option<u16>) -> (Value, Option<u16>, bool) {
    let mut changed = false;
    loop {
        value = match value {
            Value::Object(mut map) => {
                let sibling = map
                    .get("status_code")
                    .or_else(|| map.get("status"))
                    .and_then(as_status);
                let inner_key = ["response", "data"]
                    .iter()
                    .find(|k| map.contains_key(**k))
                    .copied();
                if let (Some(inner_key), Some(sibling)) = (inner_key, sibling) {
                    if status.is_none() {
                        status = Some(sibling);
                    }
                    changed = true;
                    map.remove(inner_key).unwrap_or(Value::Null)
                } else if map.contains_key("success") && map.contains_key("data") {
                    changed = true;
                    map.remove("data").unwrap_or(Value::Null)
                } else {
                    return (Value::Object(map), status, changed);
                }
            }
            Value::Array(mut items)
                if items.len() == 2 && items.last().and_then(as_status).is_some() =>
            {
                // Split order: [0] = payload, [1] = status.
                status = as_status(&items[1]);
                changed = true;
                items.swap_remove(0)
            }
            other => return (other, status, changed),
        };
    }
}

/// An integer is only a plausible HTTP status inside `100..=599`; anything
/// else leaves ordinary two-element arrays untouched.
fn as_status(value: &Value) -> Option<u16> {
    let n = value.as_u64()?;
    if (100..=599).contains(&n) {
        Some(n as u16)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_payload_defaults_to_200() {
        let env = normalize(RawResult::Json(json!({"id": "x"})));
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 200);
        assert!(env.headers.is_none());
    }

    #[test]
    fn with_status_pair_adopts_status() {
        let env = normalize(RawResult::WithStatus(json!({"id": "p1"}), 201));
        assert_eq!(env.payload, json!({"id": "p1"}));
        assert_eq!(env.status_code, 201);
    }

    #[test]
    fn response_field_with_sibling_status_unwraps() {
        let env = normalize(RawResult::Json(json!({
            "response": {"id": "x"},
            "status_code": 404
        })));
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 404);
    }

    #[test]
    fn sibling_status_does_not_override_explicit_status() {
        let env = normalize(RawResult::WithStatus(
            json!({"data": {"id": "x"}, "status": 500}),
            201,
        ));
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 201);
    }

    #[test]
    fn success_data_envelope_unwraps() {
        let env = normalize(RawResult::Json(json!({
            "success": true,
            "data": {"id": "x"}
        })));
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 200);
    }

    #[test]
    fn legacy_array_splits_payload_and_status() {
        let env = normalize(RawResult::Json(json!([{"id": "x"}, 201])));
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 201);
    }

    #[test]
    fn legacy_array_status_wins_over_column() {
        // The classic bug: row status says 200, array carries the real 201.
        let (env, changed) = repair_stored(json!([{"id": "x"}, 201]), 200, None);
        assert!(changed);
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 201);
    }

    #[test]
    fn nested_wrappers_unwrap_to_quiescence() {
        // {success, data: [payload, 201]} — two rules end to end.
        let env = normalize(RawResult::Json(json!({
            "success": true,
            "data": [{"id": "x"}, 201]
        })));
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 201);
    }

    #[test]
    fn ordinary_two_element_array_passes_through() {
        let env = normalize(RawResult::Json(json!(["a", 7])));
        assert_eq!(env.payload, json!(["a", 7]));
        assert_eq!(env.status_code, 200);
    }

    #[test]
    fn unrecognized_shape_passes_through() {
        let env = normalize(RawResult::Json(json!("just a string")));
        assert_eq!(env.payload, json!("just a string"));
        assert_eq!(env.status_code, 200);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize(RawResult::Json(json!([{"id": "x"}, 201])));
        let twice = normalize(RawResult::Envelope(once.clone()));
        assert_eq!(once, twice);
    }

    #[test]
    fn repair_of_canonical_payload_is_a_noop() {
        let (env, changed) = repair_stored(json!({"id": "x"}), 201, None);
        assert!(!changed);
        assert_eq!(env.payload, json!({"id": "x"}));
        assert_eq!(env.status_code, 201);
    }

    #[test]
    fn repair_preserves_stored_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("location".to_string(), "/v1/parties/p1".to_string());
        let (env, _) = repair_stored(json!([{"id": "x"}, 201]), 201, Some(headers.clone()));
        assert_eq!(env.headers, Some(headers));
    }
}
