//! Watsonx (Granite) client: IAM token exchange followed by a single chat
//! completion call. Failures are tagged at this boundary; the HTTP layer
//! decides how to render them on the wire.

use serde_json::json;
use thiserror::Error;

use crate::config::{Credentials, GraniteConfig};

const GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Tagged failure of the insight pipeline. The display strings are the wire
/// format consumed by existing clients and must not change.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Missing IBM credentials.")]
    MissingCredentials,
    #[error("Error fetching access token: {0}")]
    TokenExchange(String),
    #[error("Granite API call failed: {0}")]
    Completion(String),
}

/// Anything that can turn a prompt into an insight. Production uses
/// [`GraniteClient`]; tests inject deterministic stubs.
#[async_trait::async_trait]
pub trait InsightSource: Send + Sync {
    async fn insight(&self, prompt: &str) -> Result<String, InsightError>;
}

pub struct GraniteClient {
    cfg: GraniteConfig,
    client: reqwest::Client,
}

impl GraniteClient {
    pub fn new(cfg: GraniteConfig) -> Self {
        let timeout = std::time::Duration::from_millis(cfg.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self { cfg, client }
    }

    /// Exchange the API key for a short-lived bearer token. A fresh token is
    /// fetched for every insight request; there is no caching or expiry
    /// tracking.
    async fn exchange_token(&self, api_key: &str) -> Result<String, InsightError> {
        let resp = self
            .client
            .post(&self.cfg.iam_url)
            .header("accept", "application/json")
            .form(&[("apikey", api_key), ("grant_type", GRANT_TYPE)])
            .send()
            .await
            .map_err(|e| InsightError::TokenExchange(e.to_string()))?
            .error_for_status()
            .map_err(|e| InsightError::TokenExchange(e.to_string()))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| InsightError::TokenExchange(e.to_string()))?;
        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                InsightError::TokenExchange("'access_token' missing from response".to_string())
            })
    }

    async fn chat(
        &self,
        token: &str,
        creds: &Credentials,
        prompt: &str,
    ) -> Result<String, InsightError> {
        let body = json!({
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt}
                    ]
                }
            ],
            "project_id": creds.project_id,
            "model_id": self.cfg.model_id,
            "temperature": 0.7,
            "top_p": 1
        });

        let resp = self
            .client
            .post(&self.cfg.chat_url)
            .header("accept", "application/json")
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightError::Completion(e.to_string()))?
            .error_for_status()
            .map_err(|e| InsightError::Completion(e.to_string()))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| InsightError::Completion(e.to_string()))?;
        body.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                InsightError::Completion("'choices[0].message.content' missing from response".to_string())
            })
    }
}

#[async_trait::async_trait]
impl InsightSource for GraniteClient {
    async fn insight(&self, prompt: &str) -> Result<String, InsightError> {
        let creds = self
            .cfg
            .credentials
            .as_ref()
            .ok_or(InsightError::MissingCredentials)?;
        let token = self.exchange_token(&creds.api_key).await?;
        self.chat(&token, creds, prompt).await
    }
}
