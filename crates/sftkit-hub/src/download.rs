//! Model and dataset downloads through the hub cache.

use crate::error::{HubError, HubResult};
use crate::files::{self, WeightLayout};
use crate::repo::{PARQUET_CONVERSION_REVISION, RepoKind, RepoRef, endpoint_from_env};
use crate::token::HubToken;
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Cache, Repo, RepoType};
use std::path::PathBuf;
use tracing::{debug, info};

/// Client for a hub endpoint. Downloads go through the local hub cache;
/// uploads (see `upload.rs`) use the REST API directly.
#[derive(Debug, Clone)]
pub struct HubClient {
    api: Api,
    pub(crate) http: reqwest::Client,
    pub(crate) endpoint: String,
    pub(crate) token: Option<HubToken>,
}

impl HubClient {
    /// Build a client for `HF_ENDPOINT` using the discovered token, if any.
    pub fn from_env() -> HubResult<Self> {
        Self::new(endpoint_from_env(), HubToken::discover())
    }

    pub fn new(endpoint: impl Into<String>, token: Option<HubToken>) -> HubResult<Self> {
        Self::build(endpoint.into(), token, ApiBuilder::new())
    }

    /// Like [`HubClient::new`], with downloads cached under `cache_dir`
    /// instead of the default hub cache.
    pub fn with_cache_dir(endpoint: impl Into<String>, token: Option<HubToken>, cache_dir: PathBuf) -> HubResult<Self> {
        Self::build(endpoint.into(), token, ApiBuilder::from_cache(Cache::new(cache_dir)))
    }

    fn build(endpoint: String, token: Option<HubToken>, builder: ApiBuilder) -> HubResult<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let api = builder
            .with_endpoint(endpoint.clone())
            .with_token(token.as_ref().map(|t| t.expose().to_string()))
            .with_progress(false)
            .build()?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("sftkit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { api, http, endpoint, token })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn token(&self) -> Option<&HubToken> {
        self.token.as_ref()
    }

    fn api_repo(&self, repo: &RepoRef) -> ApiRepo {
        let repo_type = match repo.kind {
            RepoKind::Model => RepoType::Model,
            RepoKind::Dataset => RepoType::Dataset,
        };
        self.api.repo(Repo::with_revision(repo.id.clone(), repo_type, repo.revision.clone()))
    }

    /// List every file in the repository at its revision.
    pub async fn list_files(&self, repo: &RepoRef) -> HubResult<Vec<String>> {
        let info = self
            .api_repo(repo)
            .info()
            .await
            .map_err(|e| HubError::NotFound(format!("{} @ {}: {e}", repo.id, repo.revision)))?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    /// Download one file into the cache and return its local path.
    pub async fn fetch(&self, repo: &RepoRef, filename: &str) -> HubResult<PathBuf> {
        debug!(repo = %repo.id, revision = %repo.revision, filename, "fetching hub file");
        Ok(self.api_repo(repo).get(filename).await?)
    }

    /// Download `filename` only if the repository listing contains it.
    pub async fn fetch_if_present(
        &self,
        repo: &RepoRef,
        listing: &[String],
        filename: &str,
    ) -> HubResult<Option<PathBuf>> {
        if listing.iter().any(|f| f == filename) {
            self.fetch(repo, filename).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Download every weight file of a model repository.
    pub async fn fetch_weights(&self, repo: &RepoRef, listing: &[String]) -> HubResult<Vec<PathBuf>> {
        let layout = files::detect_weight_layout(listing)
            .ok_or_else(|| HubError::NotFound(format!("no weight files in {} @ {}", repo.id, repo.revision)))?;

        let names = match layout {
            WeightLayout::Single(name) => vec![name],
            WeightLayout::ShardIndex(index) => {
                let index_path = self.fetch(repo, &index).await?;
                let index_json: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&index_path).await?)?;
                let mut shards = files::shards_from_index(&index_json);
                if shards.is_empty() {
                    return Err(HubError::NotFound(format!("{index} in {} lists no shards", repo.id)));
                }
                shards.push(index);
                shards
            }
            WeightLayout::PyTorch(bins) => bins,
        };

        info!(repo = %repo.id, files = names.len(), "downloading model weights");
        let mut paths = Vec::with_capacity(names.len());
        for name in &names {
            paths.push(self.fetch(repo, name).await?);
        }
        Ok(paths)
    }

    /// Download the data files of one dataset split.
    ///
    /// Files committed to the dataset repository are preferred; when none match,
    /// the hub's Parquet conversion branch is tried.
    pub async fn fetch_dataset_split(
        &self,
        dataset_id: &str,
        config: Option<&str>,
        split: &str,
    ) -> HubResult<Vec<PathBuf>> {
        let repo = RepoRef::dataset(dataset_id, None);
        let listing = self.list_files(&repo).await?;
        let mut selected = files::select_split_files(&listing, config, split);
        let mut source = repo.clone();

        if selected.is_empty() {
            let converted = repo.at_revision(PARQUET_CONVERSION_REVISION);
            debug!(dataset = dataset_id, split, "no split files on main, trying parquet conversion branch");
            if let Ok(listing) = self.list_files(&converted).await {
                selected = files::select_split_files(&listing, Some(config.unwrap_or(files::DEFAULT_CONFIG)), split);
                source = converted;
            }
        }

        if selected.is_empty() {
            return Err(HubError::NotFound(format!(
                "no data files for split '{split}'{} in dataset '{dataset_id}'",
                config.map(|c| format!(" (config '{c}')")).unwrap_or_default()
            )));
        }

        info!(dataset = dataset_id, split, files = selected.len(), "downloading dataset split");
        let mut paths = Vec::with_capacity(selected.len());
        for name in &selected {
            paths.push(self.fetch(&source, name).await?);
        }
        Ok(paths)
    }
}
