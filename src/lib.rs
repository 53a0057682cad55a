//! Run a Microsoft SQL Server in a container for integration tests.
//!
//! [`mssql::run`] starts the server and waits until it accepts TCP
//! connections, [`mssql::connection_string`] tells test code how to reach it.

pub mod config;
pub mod container;
mod docker_client;
pub mod environment;
pub mod error;
pub mod image;
pub mod mssql;

pub use error::{Error, Result};
pub use mssql::{connection_string, run, run_with, MssqlContainer, PortBinding, RunOptions};
