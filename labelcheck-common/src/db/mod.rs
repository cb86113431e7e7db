//! Database connection management shared by labelcheck services

pub mod init;

pub use init::{init_database, DatabaseOptions};
