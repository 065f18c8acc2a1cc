use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Station {0} not found")]
    StationNotFound(i64),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Range too large: {frames} frames requested, maximum is {max}")]
    RangeTooLarge { frames: u64, max: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Stable tag used when errors cross a serialization boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Io(_) => "io_error",
            AppError::Csv(_) => "csv_error",
            AppError::Schema(_) => "schema_error",
            AppError::Parse(_) => "parse_error",
            AppError::StationNotFound(_) | AppError::UnknownVariable(_) => "not_found",
            AppError::InvalidRange(_) => "invalid_range",
            AppError::RangeTooLarge { .. } => "range_too_large",
            AppError::Json(_) => "invalid_request",
            AppError::TaskJoin(_) => "internal_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::StationNotFound(_) | AppError::UnknownVariable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
