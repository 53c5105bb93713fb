//! CLI argument helpers.

mod time_spec;

pub use time_spec::{TimeSpecError, parse_time_spec};
