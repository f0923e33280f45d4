//! Background dispatchers for Runtime
//!
//! - `orchestration`: consumes instance ids and runs one replay pass each
//! - `worker`: executes activities and reports their completions

mod orchestration;
mod worker;

pub use worker::ActivityTask;
