use serde::{Deserialize, Serialize};

/// Default hub endpoint, overridable through `HF_ENDPOINT`.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Revision used when none is given.
pub const DEFAULT_REVISION: &str = "main";

/// Branch where the hub publishes auto-converted Parquet exports of datasets.
pub const PARQUET_CONVERSION_REVISION: &str = "refs/convert/parquet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoKind {
    Model,
    Dataset,
}

impl RepoKind {
    /// Path segment used by the REST API (`/api/models/...`, `/api/datasets/...`).
    #[must_use]
    pub fn api_segment(self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::Dataset => "datasets",
        }
    }
}

/// A repository on the hub at a given revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub id: String,
    pub kind: RepoKind,
    pub revision: String,
}

impl RepoRef {
    #[must_use]
    pub fn model(id: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            id: id.into(),
            kind: RepoKind::Model,
            revision: revision.unwrap_or(DEFAULT_REVISION).to_string(),
        }
    }

    #[must_use]
    pub fn dataset(id: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            id: id.into(),
            kind: RepoKind::Dataset,
            revision: revision.unwrap_or(DEFAULT_REVISION).to_string(),
        }
    }

    #[must_use]
    pub fn at_revision(&self, revision: &str) -> Self {
        Self { revision: revision.to_string(), ..self.clone() }
    }
}

/// Split `namespace/name` into its parts. Ids without a namespace return `None`
/// for the namespace.
#[must_use]
pub fn split_repo_id(repo_id: &str) -> (Option<&str>, &str) {
    match repo_id.split_once('/') {
        Some((namespace, name)) => (Some(namespace), name),
        None => (None, repo_id),
    }
}

pub fn endpoint_from_env() -> String {
    std::env::var("HF_ENDPOINT")
        .ok()
        .map(|e| e.trim_end_matches('/').to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}
