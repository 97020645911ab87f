//! Route handlers. The creation endpoint wraps its side effect in the
//! idempotency orchestrator; reads are left unwrapped.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use idem_core::{Envelope, RawResult};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

/// Transport-level field carrying the client idempotency token.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
/// Transport-level field carrying the caller identity. Absent = global scope.
pub const CALLER_HEADER: &str = "x-user-id";

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[derive(Debug, Deserialize)]
pub struct CreatePartyReq {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
}

pub async fn create_party(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePartyReq>,
) -> Response {
    let idem_key = header_value(&headers, IDEMPOTENCY_HEADER);
    let caller = header_value(&headers, CALLER_HEADER);

    let op_state = state.clone();
    let result = state
        .dedup
        .handle(
            idem_key.as_deref(),
            "createParty",
            caller.as_deref(),
            move || async move {
                let id = format!("p{}", op_state.party_seq.fetch_add(1, Ordering::SeqCst) + 1);
                let party = json!({"id": id, "name": req.name, "kind": req.kind});
                op_state
                    .parties
                    .write()
                    .unwrap()
                    .insert(id.clone(), party.clone());
                let mut replay_headers = BTreeMap::new();
                replay_headers.insert("location".to_string(), format!("/v1/parties/{id}"));
                Ok(RawResult::Envelope(
                    Envelope::new(party, 201).with_headers(replay_headers),
                ))
            },
        )
        .await;

    match result {
        Ok(envelope) => envelope_response(envelope),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn get_party(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let parties = state.parties.read().unwrap();
    match parties.get(&id) {
        Some(party) => (StatusCode::OK, Json(party.clone())).into_response(),
        None => AppError::not_found("party").into_response(),
    }
}

/// Render a canonical envelope: payload as the body, status as-is, stored
/// headers replayed onto the response.
fn envelope_response(envelope: Envelope) -> Response {
    let status = StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::OK);
    let mut resp = (status, Json(envelope.payload)).into_response();
    if let Some(headers) = envelope.headers {
        for (k, v) in &headers {
            if let (Ok(name), Ok(val)) = (
                k.parse::<axum::http::header::HeaderName>(),
                v.parse::<axum::http::header::HeaderValue>(),
            ) {
                resp.headers_mut().insert(name, val);
            }
        }
    }
    resp
}
