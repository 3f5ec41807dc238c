use thiserror::Error;

pub type HubResult<T> = std::result::Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub api error: {0}")]
    Api(String),

    #[error("not found on hub: {0}")]
    NotFound(String),

    #[error("authentication required: {0}")]
    Unauthorized(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<hf_hub::api::tokio::ApiError> for HubError {
    fn from(err: hf_hub::api::tokio::ApiError) -> Self {
        Self::Api(err.to_string())
    }
}
