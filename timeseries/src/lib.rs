mod error;
pub mod fill;
pub mod timestamp;

pub use error::Error;
pub use fill::{FillOptions, Granularity, TimeSeriesPoint, fill_timeseries};
pub use timestamp::TimestampValue;
