//! Telemetry data model
//!
//! A [`NewReading`] is a validated telemetry record that has not been
//! persisted yet. The only way to build one is [`NewReading::from_payload`],
//! so every value of that type satisfies the reading invariants. A
//! [`Reading`] is what the store hands back: the same fields plus the
//! surrogate `id` the store assigned on append.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Sub-second digits kept on `received_at`; the store persists microseconds
pub const TIMESTAMP_PRECISION_DIGITS: u16 = 6;

/// Required payload fields, in the order they are validated
pub const REQUIRED_FIELDS: [&str; 4] = ["device_id", "temperature", "humidity", "location"];

/// A validated reading awaiting persistence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReading {
    device_id: String,
    temperature: f64,
    humidity: f64,
    location: String,
    received_at: DateTime<Utc>,
}

/// A persisted reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub location: String,
    pub received_at: DateTime<Utc>,
}

/// Payload could not be decoded as a JSON object
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[source] std::str::Utf8Error),
    #[error("payload is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("payload is not a JSON object (got {0})")]
    NotAnObject(&'static str),
}

/// Payload decoded but a required field is absent or has the wrong type
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be a {expected}, got {actual}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("field `device_id` must not be empty")]
    EmptyDeviceId,
}

/// Any reason an inbound payload was rejected
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl NewReading {
    /// Decode and validate a raw message payload.
    ///
    /// `received_at` is the ingestion time, never a device-supplied value,
    /// and is truncated to microseconds. Unknown fields are ignored.
    pub fn from_payload(payload: &[u8], received_at: DateTime<Utc>) -> Result<Self, PayloadError> {
        let object = decode_object(payload)?;

        let device_id = require_str(&object, "device_id")?;
        if device_id.trim().is_empty() {
            return Err(ValidationError::EmptyDeviceId.into());
        }
        let temperature = require_number(&object, "temperature")?;
        let humidity = require_number(&object, "humidity")?;
        let location = require_str(&object, "location")?;

        Ok(Self {
            device_id: device_id.to_string(),
            temperature,
            humidity,
            location: location.to_string(),
            received_at: truncate_to_storage_precision(received_at),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Attach the store-assigned id
    pub fn into_reading(self, id: i64) -> Reading {
        Reading {
            id,
            device_id: self.device_id,
            temperature: self.temperature,
            humidity: self.humidity,
            location: self.location,
            received_at: self.received_at,
        }
    }
}

fn decode_object(payload: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(DecodeError::InvalidUtf8)?;
    match serde_json::from_str::<Value>(text).map_err(DecodeError::Json)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::NotAnObject(json_type_name(&other))),
    }
}

fn require<'a>(object: &'a Map<String, Value>, field: &'static str) -> Result<&'a Value, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn require_str<'a>(object: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, ValidationError> {
    let value = require(object, field)?;
    value.as_str().ok_or(ValidationError::WrongType {
        field,
        expected: "string",
        actual: json_type_name(value),
    })
}

fn require_number(object: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    let value = require(object, field)?;
    value.as_f64().ok_or(ValidationError::WrongType {
        field,
        expected: "number",
        actual: json_type_name(value),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Drop sub-microsecond digits so a stamp survives the store unchanged
pub fn truncate_to_storage_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(TIMESTAMP_PRECISION_DIGITS)
}

/// Wall clock that never goes backwards within a process.
///
/// Owned by the single ingestion task, so no locking.
#[derive(Debug, Default)]
pub struct IngestClock {
    last: Option<DateTime<Utc>>,
}

impl IngestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&mut self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    /// Clamp a wall-clock sample so it is never earlier than the last one
    pub fn observe(&mut self, sample: DateTime<Utc>) -> DateTime<Utc> {
        let sample = truncate_to_storage_precision(sample);
        let next = match self.last {
            Some(last) if last > sample => last,
            _ => sample,
        };
        self.last = Some(next);
        next
    }
}
