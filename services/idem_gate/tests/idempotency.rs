use reqwest::Client;
use serde_json::{json, Value};

async fn setup() -> (String, Client, tokio::task::JoinHandle<()>) {
    let (addr, handle) = idem_gate::test::spawn().await;
    let base = format!("http://{}", addr);
    let http = Client::new();
    (base, http, handle)
}

const KEY: &str = "abcdefghijklmnop"; // 16 chars

// ── Happy path: create + replay ──────────────────────────────────

#[tokio::test]
async fn duplicate_delivery_replays_with_200() {
    let (base, http, _h) = setup().await;

    let first = http
        .post(format!("{}/v1/parties", base))
        .header("idempotency-key", KEY)
        .header("x-user-id", "user-1")
        .json(&json!({"name": "Acme"}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);
    assert_eq!(
        first.headers().get("location").unwrap().to_str().unwrap(),
        "/v1/parties/p1"
    );
    let first_body: Value = first.json().await.unwrap();
    assert_eq!(first_body["id"], "p1");

    let second = http
        .post(format!("{}/v1/parties", base))
        .header("idempotency-key", KEY)
        .header("x-user-id", "user-1")
        .json(&json!({"name": "Acme"}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200, "duplicate must not report created");
    assert!(second.headers().get("location").is_some(), "headers replay");
    let second_body: Value = second.json().await.unwrap();
    assert_eq!(second_body, first_body, "identical payload on replay");

    // Exactly one party was created.
    let lookup = http
        .get(format!("{}/v1/parties/p2", base))
        .send()
        .await
        .unwrap();
    assert_eq!(lookup.status(), 404);
}

#[tokio::test]
async fn without_key_every_delivery_creates() {
    let (base, http, _h) = setup().await;

    for expected_id in ["p1", "p2"] {
        let resp = http
            .post(format!("{}/v1/parties", base))
            .json(&json!({"name": "Acme"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["id"], expected_id);
    }
}

#[tokio::test]
async fn keys_are_scoped_per_caller() {
    let (base, http, _h) = setup().await;

    for user in ["user-1", "user-2"] {
        let resp = http
            .post(format!("{}/v1/parties", base))
            .header("idempotency-key", KEY)
            .header("x-user-id", user)
            .json(&json!({"name": "Acme"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "each caller gets its own scope");
    }
}

// ── Key validation ───────────────────────────────────────────────

#[tokio::test]
async fn key_shorter_than_16_is_rejected_with_dedicated_code() {
    let (base, http, _h) = setup().await;
    let resp = http
        .post(format!("{}/v1/parties", base))
        .header("idempotency-key", "x".repeat(15))
        .json(&json!({"name": "Acme"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_idempotency_key");
}

#[tokio::test]
async fn key_longer_than_128_is_rejected() {
    let (base, http, _h) = setup().await;
    let resp = http
        .post(format!("{}/v1/parties", base))
        .header("idempotency-key", "x".repeat(129))
        .json(&json!({"name": "Acme"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_idempotency_key");
}

#[tokio::test]
async fn boundary_lengths_are_accepted() {
    let (base, http, _h) = setup().await;
    for len in [16usize, 128] {
        let resp = http
            .post(format!("{}/v1/parties", base))
            .header("idempotency-key", "k".repeat(len))
            .json(&json!({"name": "Acme"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201, "len {len} must be accepted");
    }
}

// ── Transport hardening ──────────────────────────────────────────

#[tokio::test]
async fn post_without_json_content_type_is_rejected() {
    let (base, http, _h) = setup().await;
    let resp = http
        .post(format!("{}/v1/parties", base))
        .header("content-type", "text/plain")
        .body("{\"name\": \"Acme\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "unsupported_media_type");
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let (base, http, _h) = setup().await;
    let resp = http
        .post(format!("{}/v1/parties", base))
        .header("content-type", "application/json")
        .body("{not json}")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn healthz_is_up() {
    let (base, http, _h) = setup().await;
    let resp = http.get(format!("{}/healthz", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn get_party_roundtrip() {
    let (base, http, _h) = setup().await;
    let created: Value = http
        .post(format!("{}/v1/parties", base))
        .header("idempotency-key", KEY)
        .json(&json!({"name": "Acme", "kind": "customer"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let fetched: Value = http
        .get(format!("{}/v1/parties/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, created);
}
