/// Errors that abort an alignment before any transform is applied
#[derive(Debug, thiserror::Error)]
pub enum AlignmentError {
    /// Baseline or alignee input carries no features
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Options failed validation
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Worker pool for batch alignment could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// JSON options parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AlignmentError>;
