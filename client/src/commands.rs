//! Builders for outbound JSON-RPC command values.
//!
//! Scripted batches are plain `serde_json::Value`s; these helpers keep the
//! envelope fields consistent so scripts only spell out method and params.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// Build a client request with the given id.
pub fn request(id: &Value, method: &str, params: Option<&Value>) -> Result<Value> {
    serde_json::to_value(Request {
        jsonrpc: "2.0",
        id,
        method,
        params,
    })
    .context("serializing request envelope")
}

/// Build a client notification (no id, no reply expected).
pub fn notification(method: &str, params: Option<&Value>) -> Result<Value> {
    serde_json::to_value(Notification {
        jsonrpc: "2.0",
        method,
        params,
    })
    .context("serializing notification envelope")
}
