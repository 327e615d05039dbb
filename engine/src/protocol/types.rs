//! Core protocol types for the job store.
//!
//! Contains the state object contract and the persisted Job/State records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A job state as handed to the write layer.
///
/// The write layer only needs a name, an optional human-readable reason and
/// a flat string mapping. How a concrete state builds that mapping is up to
/// the state itself.
pub trait JobState {
    fn name(&self) -> &str;

    fn reason(&self) -> Option<&str>;

    /// Payload persisted alongside the state record.
    fn serialize_data(&self) -> BTreeMap<String, String>;
}

/// General purpose state object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: None,
            data: BTreeMap::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl JobState for State {
    fn name(&self) -> &str {
        &self.name
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn serialize_data(&self) -> BTreeMap<String, String> {
        self.data.clone()
    }
}

/// Persisted job row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: u64,
    pub state_id: Option<u64>,
    pub state_name: Option<String>,
    pub invocation_data: Value,
    pub created_at: u64,
    pub expire_at: Option<u64>, // None = persistent
}

/// Persisted state history row. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateRecord {
    pub id: u64,
    pub job_id: u64,
    pub name: String,
    pub reason: Option<String>,
    pub created_at: u64,
    pub data: BTreeMap<String, String>,
}
