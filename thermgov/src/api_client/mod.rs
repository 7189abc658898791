//! HTTP client for the governor API.

pub mod types;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::thermal::{DwellTimes, ThermalConfig};
use types::{ConfigFieldValue, ConfigValue, ConfigValueRequest, GovernorPatchRequest, GovernorState};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

const API_PREFIX: &str = "/api/v0";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn get_governor(&self) -> Result<GovernorState> {
        self.get("/governor").await
    }

    pub async fn patch_governor(&self, req: &GovernorPatchRequest) -> Result<GovernorState> {
        self.send(self.http.patch(self.url("/governor")).json(req))
            .await
    }

    pub async fn get_config(&self) -> Result<ThermalConfig> {
        self.get("/config").await
    }

    pub async fn get_config_field(&self, field: &str) -> Result<ConfigFieldValue> {
        self.get(&format!("/config/{field}")).await
    }

    pub async fn put_config_field(
        &self,
        field: &str,
        value: ConfigValue,
    ) -> Result<ConfigFieldValue> {
        let body = ConfigValueRequest { value };
        self.send(
            self.http
                .put(self.url(&format!("/config/{field}")))
                .json(&body),
        )
        .await
    }

    pub async fn get_stats(&self) -> Result<DwellTimes> {
        self.get("/stats").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.http.get(self.url(path))).await
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("server returned {status}: {body}");
        }

        Ok(response.json().await?)
    }
}

/// Pick the JSON type that matches how a field is typed server-side.
pub fn parse_config_value(raw: &str) -> ConfigValue {
    if let Ok(b) = raw.parse::<bool>() {
        ConfigValue::Bool(b)
    } else if let Ok(n) = raw.parse::<i64>() {
        ConfigValue::Int(n)
    } else {
        ConfigValue::Text(raw.to_string())
    }
}
