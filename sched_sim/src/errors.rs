//thiserror-based error types
use sched_core::SchedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO: {0}")] Io(#[from] std::io::Error),
    #[error("Workload: {0}")] Workload(String),
    #[error("Workload TOML: {0}")] Toml(#[from] toml::de::Error),
    #[error("Scheduler: {0}")] Sched(#[from] SchedError),
    #[error("JSON: {0}")] Json(#[from] serde_json::Error),
    #[error("Config: {0}")] Config(String),
}
