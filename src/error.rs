use thiserror::Error;

#[derive(Debug, Error)]
pub enum DppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Deterministic setup mistakes: unknown synapse class, spatial mode,
    /// cell type or channel name.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("stale handle for '{key}': generation {held} is no longer live (current {current})")]
    StaleHandle { key: String, held: u32, current: u32 },

    #[error("domain error: {0}")]
    Domain(String),

    #[error("schedule has {got} samples, the run needs exactly {expected}")]
    ScheduleLength { expected: usize, got: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DppError>;
