//! # Labelcheck Common Library
//!
//! Shared code for the label compliance services:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - SQLite pool initialization
//! - Pipeline event types and the broadcast EventBus

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
