mod error;
pub mod filter;
pub mod plan;
pub mod range;
pub mod source;
pub mod sql;
pub mod template;

pub use error::Error;
pub use filter::{FilterKey, FilterSelection, FilterTemplate, FilterValue, compile_where};
pub use plan::Plan;
pub use range::{Clock, DatePickerValue, DatetimeHelper, ResolvedTimeRange, SystemClock};
pub use source::LogSource;
pub use sql::{Param, SqlFragment, Statement};
pub use template::{
    Builder, Deployment, chart_query, count_query, joins_for, row_query, single_row_query,
};
