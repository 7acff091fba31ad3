// pca-net/src/http.rs
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pca_common::config::Settings;
use pca_common::error::{PcaError, Result};
use pca_common::model::api::{
    ApiErrorBody, LogEvent, Notification, Paged, RegistrationRequest, RemoteCommand,
    SoftwareConfig,
};
use pca_common::model::{ArtifactHead, Client, Package, Product, Software, Unit};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};
use url::Url;

use crate::control::{BuildSource, ControlPlane};
use crate::headers::parse_artifact_head;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = concat!("pca/", env!("CARGO_PKG_VERSION"));
const UNIT_PAGE_LIMIT: usize = 100;

/// HTTP client for the control-plane agent API.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    secret: String,
    as_proxy: bool,
}

fn validate_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| PcaError::Config(format!("Invalid control plane URL '{raw}': {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(PcaError::Config(format!(
            "Unsupported control plane scheme '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}

impl RestClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_base_url(
            &settings.net_info.base_url(),
            &settings.secret,
            settings.net_info.as_proxy,
        )
    }

    pub fn with_base_url(base_url: &str, secret: &str, as_proxy: bool) -> Result<Self> {
        let base = validate_base_url(base_url)?;
        // No overall timeout: build downloads may take arbitrarily long.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT_STRING)
            .build()?;
        Ok(Self {
            http,
            base,
            secret: secret.to_string(),
            as_proxy,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Prefixes `route` with `/proxy` when this agent is chained behind another agent.
    pub fn route(&self, route: &str) -> String {
        if self.as_proxy {
            format!("/proxy{route}")
        } else {
            route.to_string()
        }
    }

    fn url(&self, route: &str) -> Result<Url> {
        self.base
            .join(&self.route(route))
            .map_err(|e| PcaError::Config(format!("Invalid route '{route}': {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<Option<T>> {
        let url = self.url(route)?;
        let resp = self.http.get(url).bearer_auth(&self.secret).send().await?;
        let resp = check_response(resp).await?;
        let body = resp.text().await?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(trimmed)?))
    }

    async fn get_items<T: DeserializeOwned>(&self, route: &str) -> Result<Vec<T>> {
        Ok(self
            .get_json::<Paged<T>>(route)
            .await?
            .map(|page| page.items)
            .unwrap_or_default())
    }

    async fn post_json<B: Serialize + ?Sized + Sync>(&self, route: &str, body: &B) -> Result<()> {
        let url = self.url(route)?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.secret)
            .json(body)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    fn download_route(build_id: i64) -> String {
        format!("/api/v1/agent/build/{build_id}/download")
    }
}

async fn check_response(resp: Response) -> Result<Response> {
    let status = resp.status();
    debug!("{} {}", resp.url(), status);
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) => format!("{} {}", parsed.description, parsed.error.comment)
            .trim()
            .to_string(),
        Err(_) => body,
    };
    error!("HTTP error {} for URL {}: {}", status, url, detail);
    Err(match status {
        StatusCode::UNAUTHORIZED => PcaError::Api(format!(
            "Agent must be registered before operations (pca reg): {detail}"
        )),
        StatusCode::CONFLICT => PcaError::Api(format!("Request is inconsistent: {detail}")),
        StatusCode::NOT_FOUND => PcaError::NotFound(format!("{url}: {detail}")),
        _ => PcaError::Api(format!("HTTP error {status} for {url}: {detail}")),
    })
}

#[async_trait]
impl BuildSource for RestClient {
    async fn build_head(&self, build_id: i64) -> Result<ArtifactHead> {
        let url = self.url(&Self::download_route(build_id))?;
        let resp = self
            .http
            .head(url)
            .query(&[("start_by", "0")])
            .bearer_auth(&self.secret)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        parse_artifact_head(resp.headers())
    }

    async fn download_build(
        &self,
        build_id: i64,
        dest: &Path,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64> {
        let url = self.url(&Self::download_route(build_id))?;
        debug!("Downloading build {} to {}", build_id, dest.display());
        let resp = self
            .http
            .get(url)
            .query(&[("start_by", "0")])
            .bearer_auth(&self.secret)
            .send()
            .await?;
        let resp = check_response(resp).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut loaded: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            loaded += chunk.len() as u64;
            progress(loaded);
        }
        file.flush().await?;
        debug!("Build {} finished streaming: {} bytes", build_id, loaded);
        Ok(loaded)
    }
}

#[async_trait]
impl ControlPlane for RestClient {
    async fn register(&self, request: &RegistrationRequest) -> Result<()> {
        self.post_json("/api/v1/agent/reg", request).await
    }

    async fn clients(&self) -> Result<Vec<Client>> {
        self.get_items("/api/v1/agent/client").await
    }

    async fn products(&self, client_id: i64) -> Result<Vec<Product>> {
        self.get_items(&format!("/api/v1/agent/client/{client_id}/product"))
            .await
    }

    async fn units(&self, product_id: i64) -> Result<Vec<Unit>> {
        self.get_items(&format!(
            "/api/v1/agent/product/{product_id}/unit?limit={UNIT_PAGE_LIMIT}"
        ))
        .await
    }

    async fn unit_updates(&self, unit_id: i64) -> Result<Vec<Package>> {
        self.get_items(&format!("/api/v1/agent/unit/{unit_id}/update"))
            .await
    }

    async fn latest_patch(&self, software_id: i64) -> Result<Option<Software>> {
        self.get_json(&format!("/api/v1/agent/software/{software_id}/new_patch"))
            .await
    }

    async fn software_config(&self, software_id: i64) -> Result<Option<SoftwareConfig>> {
        self.get_json(&format!("/api/v1/agent/software/{software_id}/config"))
            .await
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.post_json("/api/v1/agent/notify", notification).await
    }

    async fn next_command(&self) -> Result<Option<RemoteCommand>> {
        self.get_json("/api/v1/agent/cmd").await
    }

    async fn post_logs(&self, events: &[LogEvent]) -> Result<()> {
        self.post_json("/api/v1/agent/log", events).await
    }

    async fn self_update(&self) -> Result<Option<Software>> {
        self.get_json("/api/v1/agent/update").await
    }
}
