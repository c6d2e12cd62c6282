//! Storage errors

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store is not configured: {0}")]
    Configuration(String),
}
