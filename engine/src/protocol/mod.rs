//! Types shared between the write layer and its callers.

mod types;

pub use types::{JobRecord, JobState, State, StateRecord};
