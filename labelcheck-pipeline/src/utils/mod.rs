//! Utility modules for labelcheck-pipeline

pub mod call_retry;
pub mod db_retry;

pub use call_retry::{call_with_retry, Attempted, RetryPolicy};
pub use db_retry::retry_on_lock;
