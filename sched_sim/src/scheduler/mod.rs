// src/scheduler/mod.rs
pub mod machine;
pub mod runner;
pub mod timing;

pub use machine::{EventRecord, Machine, SimEvent};
