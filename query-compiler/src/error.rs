#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse filters: {0}")]
    ParseFilters(serde_json::Error),
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::ParseFilters(error)
    }
}
