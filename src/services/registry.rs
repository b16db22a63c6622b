//! External mod-registry client (Modrinth-compatible API).
//!
//! Used by the crash-fix planner to validate suggested operations before
//! they become repair operations: the target project must exist and carry a
//! version compatible with the user's loader and game version. 5xx replies
//! are retried with backoff; a registry that stays down degrades the caller
//! to warnings, it never fails the pipeline.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 300;
const BACKOFF_JITTER_MS: u64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("mod registry unavailable: {0}")]
    Unavailable(String),

    #[error("mod registry returned malformed data: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryProject {
    pub id: String,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryVersion {
    pub id: String,
    pub version_number: String,
    pub game_versions: Vec<String>,
    pub loaders: Vec<String>,
}

#[async_trait]
pub trait ModRegistry: Send + Sync {
    /// Look up a project by id or slug; `None` when it does not exist.
    async fn get_project(&self, id_or_slug: &str)
    -> Result<Option<RegistryProject>, RegistryError>;

    /// Latest version of the project compatible with the target, if any.
    async fn compatible_version(
        &self,
        id_or_slug: &str,
        loader: &str,
        game_version: &str,
    ) -> Result<Option<RegistryVersion>, RegistryError>;
}

pub struct HttpModRegistry {
    http_client: Client,
    base_url: String,
}

impl HttpModRegistry {
    pub fn new(base_url: &str) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, base_url: base_url.trim_end_matches('/').to_string() }
    }

    /// GET with retries on 5xx/transport errors; 404 is `Ok(None)`.
    async fn get_with_retry(&self, url: &str) -> Result<Option<reqwest::Response>, RegistryError> {
        let mut last_err = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            match self.http_client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return Ok(Some(response));
                    }
                    last_err = format!("status {}", status);
                    if !status.is_server_error() {
                        break;
                    }
                },
                Err(e) => last_err = e.to_string(),
            }

            if attempt + 1 < MAX_ATTEMPTS {
                let backoff = BACKOFF_BASE_MS * 2u64.pow(attempt)
                    + rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(RegistryError::Unavailable(last_err))
    }
}

#[async_trait]
impl ModRegistry for HttpModRegistry {
    async fn get_project(
        &self,
        id_or_slug: &str,
    ) -> Result<Option<RegistryProject>, RegistryError> {
        let url = format!("{}/project/{}", self.base_url, id_or_slug);
        let Some(response) = self.get_with_retry(&url).await? else {
            return Ok(None);
        };

        response
            .json::<RegistryProject>()
            .await
            .map(Some)
            .map_err(|e| RegistryError::Decode(e.to_string()))
    }

    async fn compatible_version(
        &self,
        id_or_slug: &str,
        loader: &str,
        game_version: &str,
    ) -> Result<Option<RegistryVersion>, RegistryError> {
        let url = format!(
            "{}/project/{}/version?loaders=[\"{}\"]&game_versions=[\"{}\"]",
            self.base_url, id_or_slug, loader, game_version
        );
        let Some(response) = self.get_with_retry(&url).await? else {
            return Ok(None);
        };

        let versions: Vec<RegistryVersion> = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        Ok(versions.into_iter().next())
    }
}
