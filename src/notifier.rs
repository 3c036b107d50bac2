use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const ENDPOINT: &str = "https://sctapi.ftqq.com";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("No send key configured")]
    MissingKey,
    #[error("Notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Push gateway rejected notification: {0}")]
    Rejected(String),
}

pub trait Notifier {
    fn send_alert(
        &self,
        send_key: &str,
        title: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// ServerChan push gateway, one form POST per notification.
#[derive(Debug, Clone)]
pub struct ServerChan {
    client: Client,
    endpoint: String,
}

#[derive(Deserialize, Debug)]
struct GatewayReply {
    code: i64,
    #[serde(default)]
    message: String,
}

impl ServerChan {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

impl Notifier for ServerChan {
    async fn send_alert(&self, send_key: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        if send_key.is_empty() {
            return Err(NotifyError::MissingKey);
        }

        let params = [("title", title), ("desp", body)];
        let res = self
            .client
            .post(format!("{}/{}.send", self.endpoint, send_key))
            .form(&params)
            .send()
            .await?
            .error_for_status()?;

        let reply: GatewayReply = res.json().await?;
        debug!("Push gateway reply : {:?}", reply);

        if reply.code != 0 {
            return Err(NotifyError::Rejected(reply.message));
        }
        Ok(())
    }
}
