use std::env;

use anyhow::{anyhow, Result};

/// Fixed IBM endpoints used when no override is configured.
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com/identity/token";
pub const DEFAULT_CHAT_URL: &str =
    "https://us-south.ml.cloud.ibm.com/ml/v1/text/chat?version=2023-05-29";
pub const DEFAULT_MODEL_ID: &str = "ibm/granite-3-3-8b-instruct";

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// IBM Cloud credentials. Both values must be present and non-empty for the
/// service to reach watsonx; otherwise every insight call short-circuits
/// with the missing-credentials sentinel.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub project_id: String,
}

/// Everything the Granite client needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct GraniteConfig {
    pub credentials: Option<Credentials>,
    pub iam_url: String,
    pub chat_url: String,
    pub model_id: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub granite: GraniteConfig,
    pub port: u16,
    pub max_upload_bytes: Option<usize>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let credentials = match (non_empty_var("IBM_API_KEY"), non_empty_var("IBM_PROJECT_ID")) {
            (Some(api_key), Some(project_id)) => Some(Credentials {
                api_key,
                project_id,
            }),
            _ => None,
        };

        let granite = GraniteConfig {
            credentials,
            iam_url: non_empty_var("DATASIGHT_IAM_URL")
                .unwrap_or_else(|| DEFAULT_IAM_URL.to_string()),
            chat_url: non_empty_var("DATASIGHT_CHAT_URL")
                .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string()),
            model_id: non_empty_var("DATASIGHT_MODEL_ID")
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            timeout_ms: parse_optional_u64("DATASIGHT_TIMEOUT_MS")?.unwrap_or(DEFAULT_TIMEOUT_MS),
        };

        let port = match parse_optional_u64("PORT")? {
            Some(raw) => u16::try_from(raw).map_err(|_| anyhow!("PORT must fit in 16 bits"))?,
            None => DEFAULT_PORT,
        };

        let max_upload_bytes = parse_optional_u64("DATASIGHT_MAX_UPLOAD_BYTES")?.map(|v| v as usize);

        Ok(Self {
            granite,
            port,
            max_upload_bytes,
        })
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
