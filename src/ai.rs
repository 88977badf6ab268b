use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::{AiConfig, ProxyConfig};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AiRequest {
    pub user_id: String,
    pub user_name: String,
    pub question: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    #[default]
    Text,
    Image,
    /// Anything the service sends that we don't know how to render specially.
    #[serde(other)]
    Unknown,
}

/// Reply from the answering service. Every field is optional on the wire.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct AiResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub msg_type: Option<MsgType>,
}

impl AiResponse {
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            msg_type: Some(MsgType::Text),
        }
    }

    pub fn is_image(&self) -> bool {
        self.msg_type == Some(MsgType::Image)
    }
}

pub struct AiClient {
    client: reqwest::Client,
    url: String,
}

impl AiClient {
    pub fn new(config: &AiConfig, proxy: &ProxyConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout());
        builder = match proxy.to_reqwest()? {
            Some(proxy) => builder.proxy(proxy),
            None => builder.no_proxy(),
        };
        let client = builder.build().context("Failed to build AI HTTP client")?;

        Ok(Self {
            client,
            url: config.chat_url.clone(),
        })
    }

    /// Single POST to the answering service. No retries.
    pub async fn ask(&self, request: &AiRequest) -> Result<AiResponse> {
        debug!("Sending question from {} to {}", request.user_id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .context("Failed to send request to AI service")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("AI service error ({}): {}", status, error_body);
        }

        response
            .json::<AiResponse>()
            .await
            .context("Failed to parse AI service response")
    }

    /// Like [`ask`](Self::ask), but turns any failure into a text answer
    /// starting with `error_prefix` so the user always gets a reply.
    pub async fn ask_or_fallback(&self, request: &AiRequest, error_prefix: &str) -> AiResponse {
        match self.ask(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("AI request failed: {:#}", e);
                AiResponse::text(format!("{}{:#}", error_prefix, e))
            }
        }
    }
}
