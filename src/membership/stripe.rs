use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use crate::config::StripeConfig;

/// Subscription-billing side of the payment provider. Webhooks flow in
/// through the membership reconciler; this trait covers the one outbound
/// call the core makes.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn cancel_subscription(&self, subscription_id: &str, prorate: bool)
        -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build stripe http client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        prorate: bool,
    ) -> anyhow::Result<()> {
        let url = format!("{}/v1/subscriptions/{subscription_id}", self.api_base);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.secret_key)
            .form(&[("prorate", prorate.to_string())])
            .send()
            .await
            .context("stripe cancel_subscription request")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "stripe cancel_subscription returned {}",
                response.status()
            );
        }
        Ok(())
    }
}
