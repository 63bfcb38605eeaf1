//! Built-in retrieval capabilities and their collaborators.

mod daily;
mod sink;

pub use daily::{parse_date_range, DailyWindowCapability, DailyWindowSettings, Fetch, DAILY_OPERATION};
pub use sink::{JsonlSink, PayloadSink};
