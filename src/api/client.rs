use crate::api::models::{json_text, CalculateBody, CalculationResult, RateRecord, TaxRequest};
use crate::config::config::ApiConfig;
use crate::dates::EffectiveDate;
use crate::error::{Result, TaxError};
use anyhow::Context;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the caller's API key on every request
pub const API_KEY_HEADER: &str = "X-API-Key";

pub const DEFAULT_BASE_URL: &str = "https://api.surpluslinesapi.com/v1";

#[derive(Clone)]
pub struct TaxApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl TaxApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /calculate`
    pub async fn calculate(&self, api_key: &str, request: &TaxRequest) -> Result<CalculationResult> {
        let body = CalculateBody::from(request);
        let builder = self.client.post(self.endpoint("calculate")).json(&body);
        let payload = self.send(builder, api_key).await?;

        // Fields are lenient, so this only fails when the payload is not an object
        serde_json::from_value(payload).map_err(|_| TaxError::invalid_format())
    }

    /// `GET /rates?state=`, first matching schedule
    pub async fn current_rate(&self, api_key: &str, state: &str) -> Result<RateRecord> {
        let builder = self
            .client
            .get(self.endpoint("rates"))
            .query(&[("state", state)]);
        let payload = self.send(builder, api_key).await?;

        let rates = extract_list(&payload, &["data"])?;
        rates
            .first()
            .map(RateRecord::from_json)
            .ok_or_else(|| TaxError::state_not_found(state))
    }

    /// `GET /historical-rates?state=&date=`
    ///
    /// When the service has no schedule for the date it answers with the
    /// current one plus a `fallback_reason`; that comes back as a normal
    /// record carrying the notice.
    pub async fn historical_rate(
        &self,
        api_key: &str,
        state: &str,
        date: &EffectiveDate,
    ) -> Result<RateRecord> {
        let date = date.to_string();
        let builder = self
            .client
            .get(self.endpoint("historical-rates"))
            .query(&[("state", state), ("date", date.as_str())]);
        let payload = self.send(builder, api_key).await?;

        let record = payload
            .get("rate")
            .map(RateRecord::from_json)
            .unwrap_or_default()
            .with_envelope_fallback(&payload);

        if let Some(reason) = &record.fallback_reason {
            debug!("Historical rate for {} on {} fell back: {}", state, date, reason);
        }
        Ok(record)
    }

    /// `GET /states`
    pub async fn list_states(&self, api_key: &str) -> Result<Vec<String>> {
        let builder = self.client.get(self.endpoint("states"));
        let payload = self.send(builder, api_key).await?;

        let states = extract_list(&payload, &["states", "data"])?;
        Ok(states.iter().map(state_name).collect())
    }

    /// `GET /rates` without a filter
    pub async fn list_rates(&self, api_key: &str) -> Result<Vec<RateRecord>> {
        let builder = self.client.get(self.endpoint("rates"));
        let payload = self.send(builder, api_key).await?;

        let rates = extract_list(&payload, &["data"])?;
        Ok(rates.iter().map(RateRecord::from_json).collect())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, builder: reqwest::RequestBuilder, api_key: &str) -> Result<Value> {
        let request = builder.header(API_KEY_HEADER, api_key).build()?;
        debug!("Sending {} {}", request.method(), request.url());

        let response = self.client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Response status {} ({} bytes)", status, body.len());

        let payload: Value = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(e) if status.is_success() => {
                warn!("Malformed JSON from tax service: {}", e);
                return Err(TaxError::Upstream(format!("Invalid JSON response: {}", e)));
            }
            Err(_) => {
                return Err(TaxError::Upstream(format!(
                    "API error (HTTP {})",
                    status.as_u16()
                )));
            }
        };

        check_envelope(status.is_success(), &payload)?;
        Ok(payload)
    }
}

/// A payload is good only when the status was 2xx, `success` is true and
/// `error` is not `true`.
pub(crate) fn check_envelope(status_ok: bool, payload: &Value) -> Result<()> {
    let success = payload.get("success").and_then(Value::as_bool) == Some(true);
    let error_flag = payload.get("error").and_then(Value::as_bool) == Some(true);

    if status_ok && success && !error_flag {
        return Ok(());
    }
    Err(TaxError::Upstream(upstream_message(payload)))
}

fn upstream_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(json_text)
        .or_else(|| payload.get("error").and_then(json_text))
        .unwrap_or_else(|| "API error".to_string())
}

/// Pull a list out of the first key present (and non-null). A missing list
/// or anything other than an array is a format error; `[]` is a valid empty list.
pub(crate) fn extract_list<'a>(payload: &'a Value, keys: &[&str]) -> Result<&'a [Value]> {
    let found = keys
        .iter()
        .filter_map(|key| payload.get(*key))
        .find(|value| !value.is_null());

    match found {
        Some(Value::Array(items)) => Ok(items.as_slice()),
        _ => Err(TaxError::invalid_format()),
    }
}

fn state_name(entry: &Value) -> String {
    match entry {
        Value::Object(obj) => obj
            .get("name")
            .and_then(json_text)
            .unwrap_or_else(|| entry.to_string()),
        other => json_text(other).unwrap_or_else(|| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_requires_status_and_success() {
        assert!(check_envelope(true, &json!({"success": true})).is_ok());
        assert!(check_envelope(false, &json!({"success": true})).is_err());
        assert!(check_envelope(true, &json!({"success": false})).is_err());
        assert!(check_envelope(true, &json!({})).is_err());
        assert!(check_envelope(true, &json!({"success": true, "error": true})).is_err());
    }

    #[test]
    fn test_envelope_message_sources() {
        let err = check_envelope(true, &json!({"success": false, "message": "Invalid API key"}))
            .unwrap_err();
        assert_eq!(err, TaxError::Upstream("Invalid API key".to_string()));

        let err = check_envelope(false, &json!({"error": "Rate limited"})).unwrap_err();
        assert_eq!(err, TaxError::Upstream("Rate limited".to_string()));

        // A boolean error flag is not a message
        let err = check_envelope(true, &json!({"success": true, "error": true})).unwrap_err();
        assert_eq!(err, TaxError::Upstream("API error".to_string()));
    }

    #[test]
    fn test_extract_list_shapes() {
        let payload = json!({"states": null, "data": ["Texas", "Iowa"]});
        assert_eq!(extract_list(&payload, &["states", "data"]).unwrap().len(), 2);

        let payload = json!({"success": true, "data": []});
        assert!(extract_list(&payload, &["data"]).unwrap().is_empty());

        let payload = json!({"success": true});
        assert_eq!(
            extract_list(&payload, &["states", "data"]).unwrap_err(),
            TaxError::invalid_format()
        );

        let payload = json!({"success": true, "data": null});
        assert_eq!(
            extract_list(&payload, &["data"]).unwrap_err(),
            TaxError::invalid_format()
        );

        let payload = json!({"data": {"state": "Texas"}});
        assert_eq!(
            extract_list(&payload, &["data"]).unwrap_err(),
            TaxError::invalid_format()
        );
    }

    #[test]
    fn test_state_name_variants() {
        assert_eq!(state_name(&json!("Texas")), "Texas");
        assert_eq!(state_name(&json!({"name": "Iowa", "code": "IA"})), "Iowa");
        assert_eq!(state_name(&json!({"code": "IA"})), r#"{"code":"IA"}"#);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = TaxApiClient::new("http://localhost:8080/v1/");
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
        assert_eq!(client.endpoint("states"), "http://localhost:8080/v1/states");
    }
}
