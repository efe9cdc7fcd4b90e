use thiserror::Error;

/// Errors raised by the forecasting engine.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// No trained model stored for this competition. Callers retrain.
    #[error("No trained model for competition '{competition}'")]
    MissingArtifact { competition: String },

    /// Stored artifact was built against another feature schema. Callers retrain.
    #[error("Artifact schema version {found} does not match expected {expected}")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Insufficient data for {context}: {rows} rows, need at least {required}")]
    InsufficientData {
        context: String,
        rows: usize,
        required: usize,
    },

    #[error("Malformed season string: '{0}' (expected YYYY-YYYY)")]
    MalformedSeason(String),

    /// The fitted model produced an expected-goal value that is not a positive finite number.
    #[error("Invalid expected goals for {side}: {value}")]
    InvalidLambda { side: &'static str, value: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
