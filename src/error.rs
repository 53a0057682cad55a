use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The Docker Engine API call failed (pull, create, start, inspect...).
    #[error("docker: {0}")]
    Docker(#[from] docker_api::Error),

    #[error("invalid image reference: {0}")]
    InvalidImage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unable to locate the user home directory")]
    HomeDirNotFound,

    #[error("failed to disable reaper via {path}: {source}")]
    DisableReaper {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create mssql.conf: {source}")]
    SqlAgentConfig { source: std::io::Error },

    #[error("failed to read {path} for copy into the container: {source}")]
    CopyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("container {name} takes more than {timeout:?} to be ready")]
    StartTimeout { name: String, timeout: Duration },

    #[error("container {name} exited before being ready")]
    ContainerExited { name: String },

    #[error("container is not running")]
    NotRunning,

    #[error("no host port mapped to {port}")]
    PortNotMapped { port: String },
}

pub type Result<T> = std::result::Result<T, Error>;
