//! HTTP 供应商客户端
//!
//! POST {base_url}/v1/reveals 提交 Reveal，Bearer 鉴权；
//! 响应体只含 request_id，联系方式结果经回调送达。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{ProviderId, RequestId};
use crate::provider::ProviderClient;

#[derive(Debug, Serialize)]
struct SubmitRevealRequest<'a> {
    provider_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitRevealResponse {
    request_id: String,
}

/// HTTP 客户端：持有 reqwest Client、端点与密钥
pub struct HttpProviderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProviderClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn submit_reveal(&self, provider_id: &ProviderId) -> Result<RequestId, String> {
        let url = format!("{}/v1/reveals", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SubmitRevealRequest {
                provider_id: provider_id.as_str(),
            })
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("provider returned {status}: {body}"));
        }

        let parsed: SubmitRevealResponse = resp
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))?;
        Ok(RequestId::new(parsed.request_id))
    }
}
