use std::fmt;

use serde::Deserialize;

use super::TuyaError;

// ---------------------------------------------------------------------------
// Generic response envelope
//
// Every Tuya Cloud API wraps its payload in the same outer object:
//
// Success:
//   { "success": true, "t": 1545447665981, "result": <T>, "tid": "..." }
//
// Failure:
//   { "success": false, "t": 1561348644346, "code": 1010, "msg": "token invalid" }
//
// `result` is absent on failure; `code` and `msg` are absent on success.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TuyaResponse<T> {
    /// `true` on success, `false` on API-level failure.
    pub success: bool,

    /// 13-digit Unix timestamp in milliseconds returned by the server.
    pub t: i64,

    /// Present on success.
    pub result: Option<T>,

    /// Tuya error code, present on failure.
    pub code: Option<i32>,

    /// Human-readable error message, present on failure.
    pub msg: Option<String>,
}

impl<T> TuyaResponse<T> {
    /// Convert into the result plus the server timestamp `t`, mapping
    /// API-level failures to errors.
    pub fn into_result(self) -> Result<(i64, T), TuyaError> {
        if !self.success {
            return Err(TuyaError::Api {
                code: self.code.unwrap_or(-1),
                msg: self.msg.unwrap_or_else(|| "(no message)".to_owned()),
            });
        }
        match self.result {
            Some(result) => Ok((self.t, result)),
            None => Err(TuyaError::Api {
                code: self.code.unwrap_or(-1),
                msg: "success=true but result field is missing".to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// DpValue
//
// Tuya DP values are polymorphic: a single response can contain booleans,
// integers, floats and strings. Bool MUST come before Integer, and Integer
// before Float, so that serde's untagged matching keeps the narrowest type.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// `null`, objects and arrays. Kept so one odd DP never fails the poll.
    Other(serde_json::Value),
}

/// CSV cell rendering. Booleans use `True`/`False`, matching the files
/// earlier versions of the logger wrote.
impl fmt::Display for DpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpValue::Bool(true) => f.write_str("True"),
            DpValue::Bool(false) => f.write_str("False"),
            DpValue::Integer(v) => write!(f, "{v}"),
            // Whole floats keep a trailing `.0`.
            DpValue::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{v:.1}")
            }
            DpValue::Float(v) => write!(f, "{v}"),
            DpValue::Text(v) => f.write_str(v),
            DpValue::Other(serde_json::Value::Null) => Ok(()),
            DpValue::Other(v) => write!(f, "{v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Token: GET /v1.0/token?grant_type=1  and  GET /v1.0/token/{refresh_token}
// ---------------------------------------------------------------------------

/// Payload inside a successful token response. Mint and refresh share it.
#[derive(Debug, Deserialize)]
pub struct TokenResult {
    /// Short-lived bearer token used in subsequent API calls.
    pub access_token: String,

    /// Validity period in **seconds** (typically 7200).
    pub expire_time: i64,

    /// Token used to obtain a new `access_token` without re-authenticating.
    pub refresh_token: String,
}

// ---------------------------------------------------------------------------
// Device details: GET /v1.0/devices/{device_id}
// ---------------------------------------------------------------------------

/// The subset of the device details payload the logger consumes. The endpoint
/// also returns name, ip, product id and so on, which are ignored.
#[derive(Debug, Deserialize)]
pub struct DeviceDetails {
    pub online: bool,

    #[serde(default)]
    pub status: Vec<DeviceProperty>,
}

/// A single data-point (DP) from the device status list.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProperty {
    /// DP code, e.g. `"cur_power"`, `"switch_1"`, `"add_ele"`.
    pub code: String,

    /// DP value: bool, number, or string depending on the DP type.
    pub value: DpValue,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
