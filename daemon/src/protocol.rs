//! HTTP protocol definitions (JSON bodies and payloads)

use crate::collector::ProcessRecord;
use serde::{Deserialize, Deserializer, Serialize};

/// Request bodies missing a field fall back to these defaults.
fn default_signal() -> String {
    "TERM".to_string()
}

/// An explicit `null` counts as missing.
fn signal_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_signal))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalParams {
    #[serde(default = "default_signal", deserialize_with = "signal_or_default")]
    pub signal: String,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            signal: default_signal(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReniceParams {
    #[serde(default)]
    pub nice: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListParams {
    pub q: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl ListParams {
    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = ListParams::default();
        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "q" => params.q = Some(value.into_owned()),
                "sort" => params.sort = Some(value.into_owned()),
                "order" => params.order = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub count: usize,
    pub items: Vec<ProcessRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResponse {
    pub ok: bool,
    pub pid: u32,
    pub signal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReniceResponse {
    pub ok: bool,
    pub pid: u32,
    pub nice: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartResponse {
    pub ok: bool,
    pub old_pid: u32,
    pub new_pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
