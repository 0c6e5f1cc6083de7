//! Infrastructure implementation of the `KeyRegistry` port.
//!
//! Talks to the GitHub REST API (`/repos/{owner}/{repo}/keys`).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::ports::KeyRegistry;
use crate::domain::{DeployKey, RegistryCredentials, RegistryError};

/// Public GitHub API endpoint.
pub const GITHUB_API: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct NewDeployKey<'a> {
    title: &'a str,
    key: &'a str,
    read_only: bool,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

/// Deploy keys of one GitHub repository.
pub struct GithubKeyRegistry {
    client: reqwest::Client,
    keys_url: String,
    token: String,
}

impl GithubKeyRegistry {
    /// Registry against the public GitHub API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(credentials: &RegistryCredentials) -> Result<Self> {
        Self::with_base_url(GITHUB_API, credentials)
    }

    /// Registry against an arbitrary API root (GitHub Enterprise, tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str, credentials: &RegistryCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("cluster-gitops/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        let repo = &credentials.repository;
        Ok(Self {
            client,
            keys_url: format!(
                "{}/repos/{}/{}/keys",
                base_url.trim_end_matches('/'),
                repo.owner,
                repo.name
            ),
            token: credentials.token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }
}

async fn send(
    operation: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, RegistryError> {
    let response = request
        .send()
        .await
        .map_err(|e| RegistryError::Transport {
            operation,
            source: e.into(),
        })?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiMessage>(&body)
        .map(|m| m.message)
        .unwrap_or(body);
    Err(RegistryError::Status {
        operation,
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<T, RegistryError> {
    response.json().await.map_err(|e| RegistryError::Decode {
        operation,
        source: e.into(),
    })
}

impl KeyRegistry for GithubKeyRegistry {
    async fn list(&self) -> Result<Vec<DeployKey>> {
        const OP: &str = "listing deploy keys";
        let mut keys = Vec::new();
        for page in 1.. {
            let request = self
                .request(reqwest::Method::GET, &self.keys_url)
                .query(&[("per_page", PAGE_SIZE), ("page", page)]);
            let batch: Vec<DeployKey> = decode(OP, send(OP, request).await?).await?;
            let last = batch.len() < PAGE_SIZE;
            keys.extend(batch);
            if last {
                break;
            }
        }
        debug!(count = keys.len(), "listed deploy keys");
        Ok(keys)
    }

    async fn create(&self, title: &str, key: &str) -> Result<DeployKey> {
        const OP: &str = "adding deploy key";
        let request = self
            .request(reqwest::Method::POST, &self.keys_url)
            .json(&NewDeployKey {
                title,
                key,
                read_only: false,
            });
        let created: DeployKey = decode(OP, send(OP, request).await?).await?;
        debug!(id = created.id, title, "deploy key created");
        Ok(created)
    }

    async fn delete(&self, id: u64) -> Result<()> {
        const OP: &str = "removing deploy key";
        let url = format!("{}/{id}", self.keys_url);
        match send(OP, self.request(reqwest::Method::DELETE, &url)).await {
            Ok(_) => {
                debug!(id, "deploy key removed");
                Ok(())
            }
            // Already gone is as good as removed.
            Err(RegistryError::Status { status: 404, .. }) => {
                debug!(id, "deploy key already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
