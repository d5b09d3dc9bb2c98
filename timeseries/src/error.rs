#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("date range would render {buckets} data points, more than the limit of {limit}")]
    TooManyBuckets { buckets: i64, limit: usize },
}
