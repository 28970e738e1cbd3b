//! HTTP client for the fleet collector: event upload and directive polling.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commands::RawDirective;
use crate::dispatcher::RemoteSink;
use crate::models::Envelope;
use crate::settings::CollectorSettings;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest<'a> {
    device_id: &'a str,
    envelopes: &'a [Envelope],
}

#[derive(Deserialize, Default)]
struct DirectiveResponse {
    #[serde(default)]
    commands: Vec<serde_json::Value>,
}

impl DirectiveResponse {
    fn into_directives(self) -> Vec<RawDirective> {
        self.commands.into_iter().map(RawDirective::from_value).collect()
    }
}

pub struct CollectorClient {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
    auth_token: Option<String>,
}

impl CollectorClient {
    pub fn new(settings: &CollectorSettings, device_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms.max(1)))
            .user_agent(concat!("telemetry-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build collector HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            device_id: device_id.into(),
            auth_token: settings.auth_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/devices/{}/{}", self.base_url, self.device_id, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            bail!("collector rejected credentials ({status})");
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            bail!("collector rate limited the device");
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("collector returned {status}: {body}");
        }
        Ok(response)
    }

    /// Pending directives for this device. The collector removes them once
    /// handed out.
    pub async fn fetch_directives(&self) -> Result<Vec<RawDirective>> {
        let response = self
            .authorize(self.client.get(self.url("commands")))
            .send()
            .await
            .map_err(|err| anyhow!("collector unreachable: {err}"))?;

        let response = Self::check(response).await?;
        let parsed: DirectiveResponse = response
            .json()
            .await
            .context("failed to parse directive list")?;
        Ok(parsed.into_directives())
    }

    /// Feeds fetched directives into `directives` every `every` until
    /// cancelled or the receiver is gone.
    pub async fn poll_directives(
        &self,
        every: Duration,
        directives: mpsc::Sender<RawDirective>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.fetch_directives().await {
                        Ok(batch) => {
                            if !batch.is_empty() {
                                debug!("received {} directive(s)", batch.len());
                            }
                            for directive in batch {
                                if directives.send(directive).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => warn!("directive poll failed: {err:#}"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RemoteSink for CollectorClient {
    async fn deliver(&self, batch: &[Envelope]) -> Result<()> {
        let body = UploadRequest {
            device_id: &self.device_id,
            envelopes: batch,
        };
        let response = self
            .authorize(self.client.post(self.url("events")))
            .json(&body)
            .send()
            .await
            .map_err(|err| anyhow!("collector unreachable: {err}"))?;

        Self::check(response).await?;
        Ok(())
    }
}
