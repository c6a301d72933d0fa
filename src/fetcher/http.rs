//! HTTP history fetcher
//!
//! `POST {base}/device/v1.0/historical` with a bearer token and a body of
//! `{deviceSn, startTime, endTime, timeType}`. The response envelope is
//! `{success, code, msg, paramDataList: [{collectTime, dataList: [...]}]}`;
//! `collectTime` and `value` arrive as either strings or numbers.

use super::{Attribute, Credential, DataRecord, DevicePayload, DeviceFetcher, FetcherError, FetcherResult};
use crate::WorkUnit;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// History endpoint path
pub const HISTORY_ENDPOINT: &str = "/device/v1.0/historical";

/// Frame-level history granularity
const TIME_TYPE_FRAME: u8 = 5;

/// Longest body excerpt carried in a client error
const ERROR_BODY_EXCERPT: usize = 200;

/// Fetches one device-day per call over HTTP
#[derive(Debug, Clone)]
pub struct HttpDeviceFetcher {
    client: Client,
    base_url: String,
}

impl HttpDeviceFetcher {
    /// Create a fetcher sharing `client`'s connection pool
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest<'a> {
    device_sn: &'a str,
    start_time: i64,
    end_time: i64,
    time_type: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    param_data_list: Option<Vec<WireRecord>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    #[serde(deserialize_with = "de_timestamp")]
    collect_time: i64,
    #[serde(default)]
    data_list: Vec<WireAttribute>,
}

#[derive(Debug, Deserialize)]
struct WireAttribute {
    name: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    value: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    unit: Option<String>,
}

#[async_trait]
impl DeviceFetcher for HttpDeviceFetcher {
    async fn fetch_day(
        &self,
        credential: &Credential,
        unit: &WorkUnit,
    ) -> FetcherResult<DevicePayload> {
        let url = format!("{}{}", self.base_url, HISTORY_ENDPOINT);
        let body = HistoryRequest {
            device_sn: unit.device_id(),
            start_time: unit.start_unix(),
            end_time: unit.end_unix(),
            time_type: TIME_TYPE_FRAME,
        };

        debug!(unit = %unit, url = %url, "Requesting device history");

        let response = self
            .client
            .post(&url)
            .query(&[("language", "en")])
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetcherError::Server(status.as_u16()));
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(FetcherError::Client {
                status: status.as_u16(),
                message: excerpt(&text),
            });
        }
        if !status.is_success() {
            return Err(FetcherError::Malformed(format!("unexpected HTTP status {status}")));
        }

        let bytes = response.bytes().await.map_err(map_transport_error)?;
        decode_history(&bytes)
    }
}

/// Decode a history response body into a payload.
pub fn decode_history(body: &[u8]) -> FetcherResult<DevicePayload> {
    let envelope: HistoryEnvelope =
        serde_json::from_slice(body).map_err(|e| FetcherError::Malformed(e.to_string()))?;

    if envelope.success == Some(false) {
        return Err(FetcherError::Api {
            code: envelope.code.map(code_text).unwrap_or_else(|| "unknown".to_string()),
            message: envelope.msg.unwrap_or_default(),
        });
    }

    let records = envelope
        .param_data_list
        .unwrap_or_default()
        .into_iter()
        .map(|record| DataRecord {
            collect_time: record.collect_time,
            attributes: record
                .data_list
                .into_iter()
                .map(|attr| Attribute {
                    name: attr.name,
                    value: attr.value.filter(|v| !v.is_empty()),
                    unit: attr.unit.filter(|u| !u.is_empty()),
                })
                .collect(),
        })
        .collect();

    Ok(DevicePayload::new(records))
}

fn map_transport_error(e: reqwest::Error) -> FetcherError {
    if e.is_timeout() {
        FetcherError::Timeout
    } else if e.is_decode() {
        FetcherError::Malformed(e.to_string())
    } else {
        FetcherError::Network(e.to_string())
    }
}

fn code_text(code: Value) -> String {
    match code {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {n}"))),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                .map_err(|_| D::Error::custom(format!("invalid timestamp {s:?}")))
        }
        other => Err(D::Error::custom(format!("invalid timestamp {other}"))),
    }
}

fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(D::Error::custom(format!("expected scalar, found {other}"))),
    }
}
