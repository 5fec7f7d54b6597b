// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::agent::AgentId;
use crate::domain::api::{ContainerApi, DeploySpec, ProxyResponse};
use crate::domain::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const DEPLOY_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// `ContainerApi` over plain HTTP with bounded timeouts: 30s for
/// deploy/stop/proxy, 5s for health probes.
pub struct HttpContainerApi {
    client: reqwest::Client,
    probe_client: reqwest::Client,
}

impl HttpContainerApi {
    pub fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(DEPLOY_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Communication(e.to_string()))?;
        let probe_client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Communication(e.to_string()))?;
        Ok(Self {
            client,
            probe_client,
        })
    }

    fn map_error(e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else {
            ApiError::Communication(e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Status {
                code: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ContainerApi for HttpContainerApi {
    async fn deploy_agent(&self, endpoint: &str, spec: &DeploySpec) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(format!("{}/agents/deploy", endpoint.trim_end_matches('/')))
            .json(spec)
            .send()
            .await
            .map_err(Self::map_error)?;
        let response = Self::check_status(response).await?;
        response.json().await.map_err(Self::map_error)
    }

    async fn stop_agent(&self, endpoint: &str, agent_id: AgentId) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!(
                "{}/agents/{}/stop",
                endpoint.trim_end_matches('/'),
                agent_id
            ))
            .send()
            .await
            .map_err(Self::map_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn fetch_state(
        &self,
        endpoint: &str,
        agent_id: AgentId,
    ) -> Result<Option<Value>, ApiError> {
        let response = self
            .client
            .get(format!(
                "{}/agents/{}/state",
                endpoint.trim_end_matches('/'),
                agent_id
            ))
            .send()
            .await
            .map_err(Self::map_error)?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = Self::check_status(response).await?;
        Ok(Some(response.json().await.map_err(Self::map_error)?))
    }

    async fn health(&self, endpoint: &str) -> Result<bool, ApiError> {
        let response = self
            .probe_client
            .get(format!("{}/health", endpoint.trim_end_matches('/')))
            .send()
            .await
            .map_err(Self::map_error)?;
        Ok(response.status().is_success())
    }

    async fn proxy(
        &self,
        endpoint: &str,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<ProxyResponse, ApiError> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| ApiError::Communication(format!("invalid method: {e}")))?;
        let url = format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(Self::map_error)?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response.text().await.map_err(Self::map_error)?;
        // Non-JSON bodies are surfaced verbatim as a string value.
        let data = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ProxyResponse {
            status,
            data,
            headers,
        })
    }
}
