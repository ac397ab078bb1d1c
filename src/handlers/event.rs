//! Decoding of the JSON events handlers are invoked with.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event has no {0}")]
    Missing(&'static str),
    #[error("{field} is not valid JSON: {source}")]
    NotJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("log payload is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("log payload is not gzip: {0}")]
    Gzip(#[from] std::io::Error),
}

fn str_at<'a>(value: &'a Value, pointer: &'static str) -> Result<&'a str, EventError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or(EventError::Missing(pointer))
}

fn json_at(value: &Value, pointer: &'static str) -> Result<Value, EventError> {
    serde_json::from_str(str_at(value, pointer)?).map_err(|source| EventError::NotJson {
        field: pointer,
        source,
    })
}

/// `{"url": ...}` or a queue record carrying a table stream record keyed by url.
pub fn url(event: &Value) -> Result<String, EventError> {
    if let Some(url) = event.get("url").and_then(Value::as_str) {
        return Ok(url.to_string());
    }
    let record = json_at(event, "/Records/0/body")?;
    Ok(str_at(&record, "/dynamodb/Keys/url/S")?.to_string())
}

/// `{"post_id": ...}` or a queue record carrying a table stream record keyed by post id.
pub fn post_id(event: &Value) -> Result<String, EventError> {
    match event.get("post_id") {
        Some(Value::String(post_id)) => return Ok(post_id.clone()),
        Some(Value::Number(post_id)) => return Ok(post_id.to_string()),
        _ => {}
    }
    let record = json_at(event, "/Records/0/body")?;
    Ok(str_at(&record, "/dynamodb/Keys/post_id/S")?.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

/// Object-created notification delivered as queue body -> topic message -> storage record.
pub fn created_object(event: &Value) -> Result<ObjectRef, EventError> {
    let envelope = json_at(event, "/Records/0/body")?;
    let message = json_at(&envelope, "/Message")?;
    Ok(ObjectRef {
        bucket: str_at(&message, "/Records/0/s3/bucket/name")?.to_string(),
        key: str_at(&message, "/Records/0/s3/object/key")?.to_string(),
    })
}

/// First log event of a log subscription delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogData {
    pub log_group: String,
    pub log_stream: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogPayload {
    log_group: String,
    log_stream: String,
    log_events: Vec<LogEvent>,
}

#[derive(Deserialize)]
struct LogEvent {
    message: String,
    timestamp: i64,
}

/// `{"awslogs": {"data": base64(gzip(json))}}`.
pub fn log_data(event: &Value) -> Result<LogData, EventError> {
    let data = str_at(event, "/awslogs/data")?;
    let compressed = STANDARD.decode(data)?;
    let mut raw = String::new();
    GzDecoder::new(compressed.as_slice()).read_to_string(&mut raw)?;
    let payload: LogPayload = serde_json::from_str(&raw).map_err(|source| EventError::NotJson {
        field: "/awslogs/data",
        source,
    })?;
    let first = payload
        .log_events
        .into_iter()
        .next()
        .ok_or(EventError::Missing("/logEvents/0"))?;
    Ok(LogData {
        log_group: payload.log_group,
        log_stream: payload.log_stream,
        message: first.message,
        timestamp: first.timestamp,
    })
}
