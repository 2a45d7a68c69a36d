//! Core data types: tasks, filters and records.

pub mod filter;
pub mod record;
pub mod task;

pub use filter::{Comparison, Condition, FilterMap, FilterValue, RelativeRange, Scalar};
pub use record::{strip_link, value_text, QueryResult, Record};
pub use task::{ChartConfig, ChartType, DisplayFormat, Task, TaskType};
