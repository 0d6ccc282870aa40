//! Turborepo API compatibility routes
//!
//! Static identity and status payloads so an unmodified Turborepo client
//! accepts the gateway as its remote cache.

use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// Identity reported for the token, user and team
const IDENTITY: &str = "turbogha";

pub async fn current_token() -> Json<Value> {
    let now = Utc::now().timestamp_millis();
    Json(json!({
        "ok": true,
        "token": {
            "id": IDENTITY,
            "name": IDENTITY,
            "type": IDENTITY,
            "origin": IDENTITY,
            "scopes": [],
            "activeAt": now,
            "createdAt": now,
        }
    }))
}

pub async fn artifacts_status() -> Json<Value> {
    Json(json!({ "ok": true, "status": "enabled" }))
}

pub async fn user() -> Json<Value> {
    Json(json!({
        "ok": true,
        "user": {
            "id": IDENTITY,
            "username": IDENTITY,
            "email": "turbogha@turbogha.com",
            "name": IDENTITY,
            "createdAt": Utc::now().timestamp_millis(),
        }
    }))
}

pub async fn teams() -> Json<Value> {
    let now = Utc::now();
    Json(json!({
        "ok": true,
        "teams": [{
            "id": IDENTITY,
            "slug": IDENTITY,
            "name": IDENTITY,
            "createdAt": now.timestamp_millis(),
            "created": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "membership": { "role": "OWNER" },
        }]
    }))
}
